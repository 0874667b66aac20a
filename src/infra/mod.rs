// Infrastructure layer - 基础设施层
// 目前只有 Prometheus 指标

pub mod metrics;
