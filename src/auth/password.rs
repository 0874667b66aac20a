//! 密码加密和验证模块
//!
//! 使用 bcrypt 算法进行密码加密（自带随机 salt，比较过程为恒定时间）

use bcrypt::{hash, verify, DEFAULT_COST};
use lazy_static::lazy_static;

use crate::error::{Result, ServerError};

/// 密码加密成本（默认值12）
///
/// 成本值越高，加密越安全，但也越慢：
/// - 10: 约 80ms
/// - 12: 约 300ms（默认）
/// - 14: 约 1200ms
pub const PASSWORD_COST: u32 = DEFAULT_COST;

/// 最短密码长度
pub const MIN_PASSWORD_LEN: usize = 8;

lazy_static! {
    /// 用户不存在时用于比较的哈希，使响应耗时与用户存在时一致
    static ref DUMMY_HASH: String =
        hash("authgate-dummy-password", PASSWORD_COST).unwrap_or_default();
}

/// 加密密码
///
/// 返回 60 字符的 bcrypt 哈希，例如 `$2b$12$LQv3c1yqBWVHxkd0LHAkCO...`
pub fn hash_password(password: &str) -> Result<String> {
    hash_password_with_cost(password, PASSWORD_COST)
}

/// 以指定成本加密密码
pub fn hash_password_with_cost(password: &str, cost: u32) -> Result<String> {
    hash(password, cost).map_err(|e| ServerError::Internal(format!("密码加密失败: {}", e)))
}

/// 验证密码
///
/// # 返回
/// - Ok(true): 密码匹配
/// - Ok(false): 密码不匹配
/// - Err: 哈希格式错误等
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    verify(password, hash).map_err(|e| ServerError::Internal(format!("密码验证失败: {}", e)))
}

/// 执行一次必然失败的比较，只为消耗与真实比较相同的时间
pub fn burn_verify(password: &str) {
    if !DUMMY_HASH.is_empty() {
        let _ = verify(password, &DUMMY_HASH);
    }
}

/// 校验新密码（两次输入一致且满足最短长度）
pub fn validate_new_password(password: &str, confirmation: &str) -> Result<()> {
    if password != confirmation {
        return Err(ServerError::Validation("两次输入的密码不一致".to_string()));
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(ServerError::Validation(format!(
            "密码长度不能少于 {} 个字符",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}
