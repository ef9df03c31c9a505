//! UseCase 層のエラー定義

use thiserror::Error;

use crate::{
    domain::{StoreError, ValueObjectError},
    infrastructure::dto::websocket::ErrorCode,
};

/// 接続（認証）処理のエラー
///
/// いずれの場合も接続は切断され、部分的な状態は作られません。
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// 識別子やルームコードが不正
    #[error("authentication failed: {0}")]
    AuthenticationFailure(String),

    /// ルームコードに一致するルームが存在しない
    #[error("room '{0}' not found")]
    RoomNotFound(String),

    /// ストアがリトライ上限まで応答しなかった
    #[error("store unavailable")]
    StoreUnavailable,

    /// 認証処理中にトランスポートが閉じた
    #[error("connection closed during authentication")]
    ConnectionClosed,
}

impl ConnectError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ConnectError::AuthenticationFailure(_) | ConnectError::ConnectionClosed => {
                ErrorCode::AuthenticationFailure
            }
            ConnectError::RoomNotFound(_) => ErrorCode::RoomNotFound,
            ConnectError::StoreUnavailable => ErrorCode::StoreUnavailable,
        }
    }
}

impl From<ValueObjectError> for ConnectError {
    fn from(error: ValueObjectError) -> Self {
        ConnectError::AuthenticationFailure(error.to_string())
    }
}

impl From<StoreError> for ConnectError {
    fn from(_: StoreError) -> Self {
        ConnectError::StoreUnavailable
    }
}

/// Team 操作のエラー（要求者にのみ通知され、ブロードキャストはされない）
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TeamError {
    #[error("team '{0}' not found")]
    TeamNotFound(String),

    #[error("team '{0}' already exists")]
    DuplicateTeam(String),

    #[error("store unavailable")]
    StoreUnavailable,
}

impl TeamError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TeamError::TeamNotFound(_) => ErrorCode::TeamNotFound,
            TeamError::DuplicateTeam(_) => ErrorCode::DuplicateTeam,
            TeamError::StoreUnavailable => ErrorCode::StoreUnavailable,
        }
    }
}

impl From<StoreError> for TeamError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::AlreadyExists(name) => TeamError::DuplicateTeam(name),
            StoreError::NotFound(name) => TeamError::TeamNotFound(name),
            StoreError::Unavailable(_) | StoreError::Timeout(_) => TeamError::StoreUnavailable,
        }
    }
}

/// Presence 操作（名前・属性の更新）のエラー
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PresenceError {
    #[error("identity '{0}' is not known")]
    UnknownIdentity(String),

    /// ホスト以外が他人のレコードを更新しようとした
    #[error("not permitted to update identity '{0}'")]
    NotPermitted(String),

    #[error("store unavailable")]
    StoreUnavailable,
}

impl PresenceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            PresenceError::UnknownIdentity(_) => ErrorCode::AuthenticationFailure,
            PresenceError::NotPermitted(_) => ErrorCode::NotPermitted,
            PresenceError::StoreUnavailable => ErrorCode::StoreUnavailable,
        }
    }
}

impl From<StoreError> for PresenceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound(id) => PresenceError::UnknownIdentity(id),
            _ => PresenceError::StoreUnavailable,
        }
    }
}
