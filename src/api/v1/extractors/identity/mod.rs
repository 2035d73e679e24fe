/*!
 * Request identity extractor
 *
 * Responsibility:
 * - gate が解決したアイデンティティ (Identity) とゲート状態を handler に提供する
 * - HTTP / axum 依存は core に閉じ込め、型定義は types に分離する
 *
 * Public API:
 * - Identity
 * - GateState
 * - RequestContext
 */

mod core;
mod types;

pub use types::{GateState, Identity, RequestContext};
