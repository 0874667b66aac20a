// 认证模块 - 密钥管理、令牌签发与验证、吊销列表、凭据校验和授权

pub mod authorizer;
pub mod credential;
pub mod key_provider;
pub mod models;
pub mod password;
pub mod revocation;
pub mod token_codec;
pub mod user_store;

// 重新导出主要类型
pub use authorizer::{requirement_for, Operation, OwnershipAuthorizer, Requirement};
pub use credential::CredentialVerifier;
pub use key_provider::{KeyProvider, Keypair, SUPPORTED_ALGORITHM};
pub use models::{
    Identity, IssuedToken, LogoutAck, Principal, SessionClaims, TokenKind, TokenPair, UserRecord,
};
pub use password::{hash_password, verify_password, PASSWORD_COST};
pub use revocation::{
    spawn_prune_task, MemoryRevocationStore, RevocationStore, SledRevocationStore,
};
pub use token_codec::{TokenCodec, TokenError};
pub use user_store::{MemoryUserStore, UserStore, UserStoreError};
