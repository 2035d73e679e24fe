/*
 * Responsibility
 * - Router に紐づける共有コンテキスト (AppState)
 *   - tokens: TokenStore, gate: AuthGate, normalizer: ResponseNormalizer
 * - Clone 前提で持つ (内部は Arc/Clone cheap)
 * - リクエスト間で共有する可変状態は token store (repo) のみ
 */
use std::sync::Arc;

use crate::config::Config;
use crate::middleware::auth::gate::AuthGate;
use crate::middleware::envelope::ResponseNormalizer;
use crate::middleware::http::REQUEST_BODY_LIMIT_BYTES;
use crate::repos::TokenRepo;
use crate::services::auth::{TokenStore, TokenValidator};

#[derive(Clone, Debug)]
pub struct AppState {
    pub tokens: TokenStore,
    pub gate: Arc<AuthGate>,
    pub normalizer: Arc<ResponseNormalizer>,
    // Secure attribute on the token cookie
    pub secure_cookies: bool,
}

impl AppState {
    pub fn new(
        tokens: TokenStore,
        gate: Arc<AuthGate>,
        normalizer: Arc<ResponseNormalizer>,
        secure_cookies: bool,
    ) -> Self {
        Self {
            tokens,
            gate,
            normalizer,
            secure_cookies,
        }
    }

    pub fn from_config(config: &Config, repo: Arc<dyn TokenRepo>) -> Self {
        let tokens = TokenStore::new(repo, config.token_lifetime);
        let validator = TokenValidator::new(tokens.clone());
        let gate = AuthGate::new(config.gate.clone(), validator, REQUEST_BODY_LIMIT_BYTES);
        let normalizer = ResponseNormalizer::new(config.envelope.clone());

        Self::new(
            tokens,
            Arc::new(gate),
            Arc::new(normalizer),
            config.app_env.is_production(),
        )
    }
}
