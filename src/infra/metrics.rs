//! Prometheus 指标：登录 / 刷新结果、吊销数量、吊销列表大小
//!
//! 通过 `init()` 安装全局 Recorder，通过 HTTP GET `/metrics` 暴露抓取端点。

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::OnceLock;

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// 指标名称
const COUNTER_LOGIN_TOTAL: &str = "authgate_login_total";
const COUNTER_REFRESH_TOTAL: &str = "authgate_refresh_total";
const COUNTER_REVOCATIONS_TOTAL: &str = "authgate_revocations_total";
const COUNTER_REVOCATIONS_PRUNED: &str = "authgate_revocations_pruned_total";
const GAUGE_REVOCATION_LIST_SIZE: &str = "authgate_revocation_list_size";
const HISTOGRAM_LOGIN_DURATION: &str = "authgate_login_duration_seconds";

/// 初始化 Prometheus 指标（安装全局 Recorder，返回 Handle 用于 HTTP 暴露）。
/// 仅需在进程内调用一次；重复调用会返回 Err。
pub fn init() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;
    HANDLE
        .set(handle)
        .map_err(|_| "metrics already initialized")?;
    Ok(())
}

/// 渲染当前指标为 Prometheus 文本格式，供 GET /metrics 使用。
pub fn render_metrics() -> Option<String> {
    HANDLE.get().map(|h| h.render())
}

/// 记录一次登录：结果（success / rejected / unavailable / error）+ 耗时。
pub fn record_login(outcome: &'static str, duration_secs: f64) {
    metrics::counter!(COUNTER_LOGIN_TOTAL, "outcome" => outcome).increment(1);
    metrics::histogram!(HISTOGRAM_LOGIN_DURATION, "outcome" => outcome).record(duration_secs);
}

/// 记录一次刷新：结果（success / reused / rejected / error）。
pub fn record_refresh(outcome: &'static str) {
    metrics::counter!(COUNTER_REFRESH_TOTAL, "outcome" => outcome).increment(1);
}

/// 记录新增吊销条目，reason 为 logout / rotation / reuse。
pub fn record_revocation(reason: &'static str, count: usize) {
    metrics::counter!(COUNTER_REVOCATIONS_TOTAL, "reason" => reason).increment(count as u64);
}

/// 记录清理掉的过期吊销条目数（Counter）。
pub fn record_revocations_pruned(count: usize) {
    metrics::counter!(COUNTER_REVOCATIONS_PRUNED).increment(count as u64);
}

/// 更新吊销列表当前大小（Gauge）。由清理任务周期调用。
pub fn record_revocation_list_size(size: usize) {
    metrics::gauge!(GAUGE_REVOCATION_LIST_SIZE).set(size as f64);
}
