//! Preconditioner type tags.
//!
//! This module defines the `PcType` enum naming the preconditioner selected
//! for a (coarse) problem. The BDDC coarse solver reports it so callers can
//! check whether the hierarchy recursed or fell back to a redundant direct
//! solve.

/// Preconditioner kinds the coarse solver can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcType {
    /// Dense LU of the assembled matrix, replicated on every rank of the level.
    Redundant,
    /// Another BDDC level.
    Bddc,
}

impl std::fmt::Display for PcType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PcType::Redundant => f.write_str("redundant"),
            PcType::Bddc => f.write_str("bddc"),
        }
    }
}
