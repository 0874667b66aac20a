//! 签名密钥对管理
//!
//! 首次启动时生成 Ed25519 密钥对并写入配置路径（私钥 PKCS#8 PEM，公钥 SPKI PEM），
//! 之后每次启动读取并校验。多进程同时首次启动时，通过 `create_new` 锁文件串行化生成，
//! 抢锁失败的一方等待锁释放后读取胜者写入的文件。

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use rand::rngs::OsRng;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ServerError};

/// 支持的签名算法标识
pub const SUPPORTED_ALGORITHM: &str = "EdDSA";

/// 锁文件轮询间隔
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// 等待其他进程完成生成的最长时间
const LOCK_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
/// 锁文件修改时间早于此值视为遗留锁（持锁进程已崩溃）
const LOCK_STALE_THRESHOLD: Duration = Duration::from_secs(60);

const PROBE_MESSAGE: &[u8] = b"authgate keypair probe";

/// 进程内唯一的签名密钥对
pub struct Keypair {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    public_key_pem: String,
}

impl Keypair {
    fn from_parts(signing_key: &SigningKey, verifying_key: &VerifyingKey) -> Result<Self> {
        // 私钥签名、公钥验签，不通过说明两份文件不是同一对
        let signature = signing_key.sign(PROBE_MESSAGE);
        verifying_key
            .verify(PROBE_MESSAGE, &signature)
            .map_err(|_| ServerError::KeyUnavailable("公钥与私钥不匹配".to_string()))?;

        let der = signing_key
            .to_pkcs8_der()
            .map_err(|e| ServerError::KeyUnavailable(format!("编码私钥失败: {}", e)))?;
        let encoding_key = EncodingKey::from_ed_der(der.as_bytes());

        let x = URL_SAFE_NO_PAD.encode(verifying_key.as_bytes());
        let decoding_key = DecodingKey::from_ed_components(&x)
            .map_err(|e| ServerError::KeyUnavailable(format!("构造验签密钥失败: {}", e)))?;

        let public_key_pem = verifying_key
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ServerError::KeyUnavailable(format!("编码公钥失败: {}", e)))?;

        Ok(Self {
            algorithm: Algorithm::EdDSA,
            encoding_key,
            decoding_key,
            public_key_pem,
        })
    }

    /// 内存中临时生成（仅测试）
    #[cfg(test)]
    pub(crate) fn ephemeral() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self::from_parts(&signing_key, &verifying_key).expect("ephemeral keypair")
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }

    pub fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }

    /// 可对外分发的公钥 PEM
    pub fn public_key_pem(&self) -> &str {
        &self.public_key_pem
    }
}

impl fmt::Debug for Keypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keypair")
            .field("algorithm", &self.algorithm)
            .field("public_key_pem", &self.public_key_pem)
            .finish_non_exhaustive()
    }
}

/// 密钥对提供者
#[derive(Debug, Clone)]
pub struct KeyProvider {
    private_key_path: PathBuf,
    public_key_path: PathBuf,
}

impl KeyProvider {
    /// 创建密钥提供者，`algorithm` 必须是 `EdDSA`
    pub fn new(
        private_key_path: impl Into<PathBuf>,
        public_key_path: impl Into<PathBuf>,
        algorithm: &str,
    ) -> Result<Self> {
        if algorithm != SUPPORTED_ALGORITHM {
            return Err(ServerError::Configuration(format!(
                "不支持的签名算法: {}（仅支持 {}）",
                algorithm, SUPPORTED_ALGORITHM
            )));
        }

        Ok(Self {
            private_key_path: private_key_path.into(),
            public_key_path: public_key_path.into(),
        })
    }

    pub fn private_key_path(&self) -> &Path {
        &self.private_key_path
    }

    pub fn public_key_path(&self) -> &Path {
        &self.public_key_path
    }

    /// 确保密钥对可用：不存在则生成，存在则加载并校验
    pub fn ensure_keys(&self) -> Result<Keypair> {
        ensure_keys(&self.private_key_path, &self.public_key_path)
    }
}

/// 确保密钥对可用
///
/// - 两个文件都存在：读取、解析并校验配对
/// - 任一缺失：抢占锁文件后生成；抢锁失败则等待并读取胜者的文件
pub fn ensure_keys(private_path: &Path, public_path: &Path) -> Result<Keypair> {
    if private_path.exists() && public_path.exists() {
        return load_keys(private_path, public_path);
    }

    let lock_path = lock_path_for(private_path);
    if let Some(parent) = lock_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                ServerError::KeyUnavailable(format!("无法创建密钥目录 {:?}: {}", parent, e))
            })?;
        }
    }

    match OpenOptions::new().write(true).create_new(true).open(&lock_path) {
        Ok(_) => {
            let _guard = BootstrapLock { path: lock_path };

            // 拿到锁时其他进程可能已经完成生成
            if private_path.exists() && public_path.exists() {
                debug!("持锁后发现密钥已存在，直接加载");
                return load_keys(private_path, public_path);
            }

            generate_keys(private_path, public_path)
        }
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            info!("其他进程正在生成密钥，等待锁释放: {:?}", lock_path);
            wait_for_release(&lock_path)?;
            load_keys(private_path, public_path)
        }
        Err(e) => Err(ServerError::KeyUnavailable(format!(
            "无法创建密钥锁文件 {:?}: {}",
            lock_path, e
        ))),
    }
}

fn load_keys(private_path: &Path, public_path: &Path) -> Result<Keypair> {
    let private_pem = fs::read_to_string(private_path).map_err(|e| {
        ServerError::KeyUnavailable(format!("无法读取私钥 {:?}: {}", private_path, e))
    })?;
    let public_pem = fs::read_to_string(public_path).map_err(|e| {
        ServerError::KeyUnavailable(format!("无法读取公钥 {:?}: {}", public_path, e))
    })?;

    let signing_key = SigningKey::from_pkcs8_pem(&private_pem).map_err(|e| {
        ServerError::KeyUnavailable(format!("私钥格式错误 {:?}: {}", private_path, e))
    })?;
    let verifying_key = VerifyingKey::from_public_key_pem(&public_pem).map_err(|e| {
        ServerError::KeyUnavailable(format!("公钥格式错误 {:?}: {}", public_path, e))
    })?;

    let keypair = Keypair::from_parts(&signing_key, &verifying_key)?;
    info!("🔑 已加载签名密钥对: {:?}", public_path);
    Ok(keypair)
}

fn generate_keys(private_path: &Path, public_path: &Path) -> Result<Keypair> {
    let signing_key = SigningKey::generate(&mut OsRng);
    let verifying_key = signing_key.verifying_key();

    let private_pem = signing_key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| ServerError::KeyUnavailable(format!("编码私钥失败: {}", e)))?;
    let public_pem = verifying_key
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| ServerError::KeyUnavailable(format!("编码公钥失败: {}", e)))?;

    write_atomically(private_path, private_pem.as_bytes(), true)?;
    write_atomically(public_path, public_pem.as_bytes(), false)?;

    info!(
        "🔑 已生成新的签名密钥对: private={:?}, public={:?}",
        private_path, public_path
    );

    Keypair::from_parts(&signing_key, &verifying_key)
}

/// 先写临时文件再 rename，读者不会看到写了一半的文件
fn write_atomically(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                ServerError::KeyUnavailable(format!("无法创建密钥目录 {:?}: {}", parent, e))
            })?;
        }
    }

    let tmp_path = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    let write_result = (|| -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        restrict_permissions(&mut options, private);

        let mut file = options.open(&tmp_path)?;
        file.write_all(contents)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    write_result.map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        ServerError::KeyUnavailable(format!("无法写入密钥文件 {:?}: {}", path, e))
    })
}

/// 私钥文件仅属主可读写
#[cfg(unix)]
fn restrict_permissions(options: &mut OpenOptions, private: bool) {
    use std::os::unix::fs::OpenOptionsExt;
    if private {
        options.mode(0o600);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_options: &mut OpenOptions, _private: bool) {}

fn wait_for_release(lock_path: &Path) -> Result<()> {
    let started = Instant::now();
    while lock_path.exists() {
        if let Some(age) = lock_age(lock_path) {
            if age >= LOCK_STALE_THRESHOLD {
                warn!("发现遗留的密钥锁: {:?}, 已存在 {:?}", lock_path, age);
                return Err(ServerError::KeyUnavailable(format!(
                    "密钥生成锁 {:?} 已存在 {}s，持锁进程可能已退出，确认后请手动删除",
                    lock_path,
                    age.as_secs()
                )));
            }
        }
        if started.elapsed() >= LOCK_WAIT_TIMEOUT {
            warn!("等待密钥锁超时: {:?}", lock_path);
            return Err(ServerError::KeyUnavailable(format!(
                "密钥生成锁 {:?} 长时间未释放，如确认无其他进程在生成请手动删除",
                lock_path
            )));
        }
        thread::sleep(LOCK_POLL_INTERVAL);
    }
    Ok(())
}

/// 锁文件自最后修改以来的时长；文件已消失或时钟回拨时返回 `None`
fn lock_age(lock_path: &Path) -> Option<Duration> {
    let modified = fs::metadata(lock_path).ok()?.modified().ok()?;
    SystemTime::now().duration_since(modified).ok()
}

fn lock_path_for(private_path: &Path) -> PathBuf {
    let mut name = private_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".lock");
    private_path.with_file_name(name)
}

/// 持有期间锁文件存在，释放时删除
struct BootstrapLock {
    path: PathBuf,
}

impl Drop for BootstrapLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!("删除密钥锁文件失败 {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use tempfile::TempDir;

    fn paths(dir: &TempDir) -> (PathBuf, PathBuf) {
        (
            dir.path().join("keys").join("private.pem"),
            dir.path().join("keys").join("public.pem"),
        )
    }

    #[test]
    fn test_bootstrap_then_reload() {
        let dir = TempDir::new().unwrap();
        let (private, public) = paths(&dir);

        let first = ensure_keys(&private, &public).unwrap();
        assert!(private.exists());
        assert!(public.exists());
        assert!(!lock_path_for(&private).exists());

        let second = ensure_keys(&private, &public).unwrap();
        assert_eq!(first.public_key_pem(), second.public_key_pem());
        assert!(second.public_key_pem().contains("BEGIN PUBLIC KEY"));
    }

    #[cfg(unix)]
    #[test]
    fn test_private_key_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let (private, public) = paths(&dir);
        ensure_keys(&private, &public).unwrap();

        let mode = fs::metadata(&private).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_mismatched_pair_is_fatal() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let (private_a, public_a) = paths(&dir_a);
        let (_, public_b) = paths(&dir_b);
        ensure_keys(&private_a, &public_a).unwrap();
        ensure_keys(&paths(&dir_b).0, &public_b).unwrap();

        let result = ensure_keys(&private_a, &public_b);
        assert!(matches!(result, Err(ServerError::KeyUnavailable(_))));
    }

    #[test]
    fn test_garbage_key_file_is_fatal() {
        let dir = TempDir::new().unwrap();
        let (private, public) = paths(&dir);
        ensure_keys(&private, &public).unwrap();
        fs::write(&private, "not a pem").unwrap();

        let result = ensure_keys(&private, &public);
        assert!(matches!(result, Err(ServerError::KeyUnavailable(_))));
    }

    #[test]
    fn test_concurrent_bootstrap_yields_single_keypair() {
        let dir = TempDir::new().unwrap();
        let (private, public) = paths(&dir);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let private = private.clone();
                let public = public.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    ensure_keys(&private, &public)
                        .map(|k| k.public_key_pem().to_string())
                })
            })
            .collect();

        let pems: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        let on_disk = fs::read_to_string(&public).unwrap();
        assert!(pems.iter().all(|p| *p == on_disk));
    }

    #[test]
    fn test_waits_for_lock_holder() {
        let dir = TempDir::new().unwrap();
        let (private, public) = paths(&dir);
        fs::create_dir_all(private.parent().unwrap()).unwrap();

        // 模拟另一进程持锁并在稍后写完文件
        let lock = lock_path_for(&private);
        fs::write(&lock, b"").unwrap();
        let donor = TempDir::new().unwrap();
        let (donor_private, donor_public) = paths(&donor);
        let donor_keys = ensure_keys(&donor_private, &donor_public).unwrap();

        let writer = {
            let (private, public, lock) = (private.clone(), public.clone(), lock.clone());
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(200));
                fs::copy(&donor_private, &private).unwrap();
                fs::copy(&donor_public, &public).unwrap();
                fs::remove_file(&lock).unwrap();
            })
        };

        let loaded = ensure_keys(&private, &public).unwrap();
        writer.join().unwrap();
        assert_eq!(loaded.public_key_pem(), donor_keys.public_key_pem());
    }

    #[test]
    fn test_stale_lock_is_reported() {
        let dir = TempDir::new().unwrap();
        let (private, public) = paths(&dir);
        fs::create_dir_all(private.parent().unwrap()).unwrap();

        let lock = lock_path_for(&private);
        let file = fs::File::create(&lock).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();
        drop(file);

        let started = Instant::now();
        let result = ensure_keys(&private, &public);
        assert!(matches!(result, Err(ServerError::KeyUnavailable(_))));
        assert!(started.elapsed() < LOCK_WAIT_TIMEOUT);
        // 遗留锁不会被自动清除，也不会生成密钥
        assert!(lock.exists());
        assert!(!private.exists());
    }

    #[test]
    fn test_rejects_unsupported_algorithm() {
        let result = KeyProvider::new("a.pem", "b.pem", "RS256");
        assert!(matches!(result, Err(ServerError::Configuration(_))));
        assert!(KeyProvider::new("a.pem", "b.pem", "EdDSA").is_ok());
    }

    #[test]
    fn test_debug_hides_private_material() {
        let keypair = Keypair::ephemeral();
        let debug = format!("{:?}", keypair);
        assert!(!debug.contains("PRIVATE"));
        assert!(debug.contains("EdDSA"));
    }
}
