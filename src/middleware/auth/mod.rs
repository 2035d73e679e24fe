/*
 * Responsibility
 * - token gate (extract → validate → Identity/GateState bind)
 */
pub mod extract;
pub mod gate;
