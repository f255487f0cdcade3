//! 身份校验协作方抽象
//!
//! 身份解析委托给外部令牌校验服务，这里只定义返回稳定用户标识的
//! 接口；凭证被拒绝时返回 [`ApplicationError::Unauthorized`]，不重试。

use async_trait::async_trait;
use domain::UserId;

use crate::error::ApplicationError;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<UserId, ApplicationError>;
}

/// 静态令牌表实现（用于测试）
pub mod memory {
    use std::collections::HashMap;

    use super::*;

    #[derive(Default)]
    pub struct StaticTokenVerifier {
        tokens: HashMap<String, UserId>,
    }

    impl StaticTokenVerifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_token(mut self, token: impl Into<String>, user_id: UserId) -> Self {
            self.tokens.insert(token.into(), user_id);
            self
        }
    }

    #[async_trait]
    impl IdentityVerifier for StaticTokenVerifier {
        async fn verify(&self, token: &str) -> Result<UserId, ApplicationError> {
            self.tokens
                .get(token)
                .cloned()
                .ok_or(ApplicationError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::StaticTokenVerifier;
    use super::*;

    #[tokio::test]
    async fn test_known_token_resolves_user() {
        let verifier =
            StaticTokenVerifier::new().with_token("token-1", UserId::from("alice"));
        let user = verifier.verify("token-1").await.unwrap();
        assert_eq!(user, UserId::from("alice"));
    }

    #[tokio::test]
    async fn test_unknown_token_is_unauthorized() {
        let verifier = StaticTokenVerifier::new();
        let result = verifier.verify("nope").await;
        assert!(matches!(result, Err(ApplicationError::Unauthorized)));
    }
}
