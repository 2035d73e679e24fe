/*
 * Responsibility
 * - Handler から見える「認証コンテキスト」の型
 * - gate middleware が request extensions に格納し、handler はこの型だけを受け取る
 *
 * Notes
 * - トークン検証と有効期限の延長は middleware/services 側の責務
 * - トークン値そのものはここに載せない
 */
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::services::auth::Token;

/// Who the current request is acting as.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Identity {
    User {
        user_id: Uuid,
        token_id: Uuid,
        expires_at: DateTime<Utc>,
    },
    #[default]
    Anonymous,
}

impl Identity {
    pub fn from_token(token: &Token) -> Self {
        Self::User {
            user_id: token.owner_id,
            token_id: token.id,
            expires_at: token.expires_at,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            Self::User { user_id, .. } => Some(*user_id),
            Self::Anonymous => None,
        }
    }
}

/// Where the auth gate left the request.
///
/// `Unchecked` is what handlers see on routes the gate is not layered on.
/// `Rejected` never reaches a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GateState {
    #[default]
    Unchecked,
    Exempt,
    Rejected,
    Authorized,
}

/// The per-request context handed to handlers.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub identity: Identity,
    pub gate: GateState,
}
