//! Error taxonomy for the Connection Manager.
//!
//! Grouped per component, the way this codebase keeps `AuthError` next to
//! auth and `TwoFactorError` next to two-factor: each enum derives
//! [`strum::IntoStaticStr`] so call sites can attach a cheap `error` field to
//! a `tracing` event without formatting the whole error.

use thiserror::Error;

/// Errors surfaced by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum TransportError {
    #[error("transport operation timed out")]
    Timeout,
    #[error("transport is closed")]
    Closed,
    #[error("transport I/O error")]
    Io,
}

/// Errors surfaced by [`Connection`](crate::connection::Connection) operations.
#[derive(Error, Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
pub enum ConnError {
    #[error("connection is closed")]
    Closed,
    #[error("send queue is full")]
    QueueFull,
    #[error("request timed out waiting for a response")]
    RequestTimeout,
    #[error("operation not supported on this connection variant")]
    Unsupported,
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Errors surfaced by [`Shard`](crate::shard::Shard) operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum ShardError {
    #[error("connection id already registered")]
    Duplicate,
}

/// Errors surfaced by [`Manager`](crate::manager::Manager) lifecycle operations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr)]
pub enum ManagerError {
    #[error("manager is already initialized")]
    AlreadyInitialized,
    #[error("manager is not initialized")]
    NotInitialized,
    #[error("manager is closed or draining")]
    Closed,
    #[error("connection id already registered")]
    Duplicate,
}

impl From<ShardError> for ManagerError {
    fn from(e: ShardError) -> Self {
        match e {
            ShardError::Duplicate => ManagerError::Duplicate,
        }
    }
}
