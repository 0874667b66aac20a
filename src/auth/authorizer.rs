//! 操作权限表
//!
//! 每个操作对应一种访问要求，请求处理前用 `OwnershipAuthorizer::check` 校验。

use lazy_static::lazy_static;
use std::collections::HashMap;
use tracing::debug;

use crate::auth::models::Principal;
use crate::error::{Result, ServerError};

/// 受控操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListUsers,
    CreateUser,
    Login,
    Refresh,
    VerifyToken,
    ViewProtected,
    Logout,
    RetrieveUser,
    UpdateProfile,
    ChangePassword,
    ChangeEmail,
    DeleteAccount,
}

/// 访问要求
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// 无需认证
    Anonymous,
    /// 任意已认证用户
    Authenticated,
    /// 资源所有者或超级用户
    OwnerOrSuperuser,
}

lazy_static! {
    /// 操作 -> 访问要求
    static ref POLICY: HashMap<Operation, Requirement> = {
        use Operation::*;
        use Requirement::*;

        let mut map = HashMap::new();

        // ==================== 公开接口 ====================
        map.insert(ListUsers, Anonymous);
        map.insert(CreateUser, Anonymous);
        map.insert(Login, Anonymous);
        map.insert(Refresh, Anonymous);
        map.insert(VerifyToken, Anonymous);

        // ==================== 需要登录 ====================
        map.insert(ViewProtected, Authenticated);
        map.insert(Logout, Authenticated);
        map.insert(RetrieveUser, Authenticated);

        // ==================== 仅所有者 ====================
        map.insert(UpdateProfile, OwnerOrSuperuser);
        map.insert(ChangePassword, OwnerOrSuperuser);
        map.insert(ChangeEmail, OwnerOrSuperuser);
        map.insert(DeleteAccount, OwnerOrSuperuser);

        map
    };
}

/// 查询操作的访问要求（未登记的操作按最严格处理）
pub fn requirement_for(operation: Operation) -> Requirement {
    POLICY
        .get(&operation)
        .copied()
        .unwrap_or(Requirement::OwnerOrSuperuser)
}

/// 基于所有权的授权
pub struct OwnershipAuthorizer;

impl OwnershipAuthorizer {
    /// 主体是否可以操作该用户拥有的资源
    pub fn authorize(principal: &Principal, resource_owner_id: u64) -> bool {
        principal.id == resource_owner_id || principal.is_superuser
    }

    /// 按权限表校验一次请求
    ///
    /// - 需要认证但没有主体：`Unauthorized`
    /// - 需要所有权但不是所有者（或未指定资源）：`Forbidden`
    pub fn check(
        operation: Operation,
        principal: Option<&Principal>,
        resource_owner_id: Option<u64>,
    ) -> Result<()> {
        let requirement = requirement_for(operation);

        match requirement {
            Requirement::Anonymous => Ok(()),
            Requirement::Authenticated => principal
                .map(|_| ())
                .ok_or_else(|| ServerError::Unauthorized("authentication required".to_string())),
            Requirement::OwnerOrSuperuser => {
                let principal = principal.ok_or_else(|| {
                    ServerError::Unauthorized("authentication required".to_string())
                })?;

                match resource_owner_id {
                    Some(owner) if Self::authorize(principal, owner) => Ok(()),
                    _ => {
                        debug!(
                            "拒绝操作 {:?}: principal={}, owner={:?}",
                            operation, principal.id, resource_owner_id
                        );
                        Err(ServerError::Forbidden)
                    }
                }
            }
        }
    }
}
