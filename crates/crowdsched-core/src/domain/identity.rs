//! Identity - リクエスト元の識別
//!
//! 登録ユーザー・匿名 IP・外部 UID の 3 チャネルは排他的です。
//! 生の 3 つ組 `(user_id, user_ip, external_uid)` から `Identity::resolve` で
//! 優先順位 user_id > external_uid > user_ip に従って 1 つに確定します。

use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::UserId;

/// IP も UID も無い匿名リクエストに割り当てるアドレス
pub const FALLBACK_IP: &str = "127.0.0.1";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "channel", content = "value", rename_all = "snake_case")]
pub enum Identity {
    /// 認証済みユーザー
    Registered(UserId),
    /// 匿名の貢献者（リモートアドレスで識別）
    Anonymous(String),
    /// プロジェクトが外部 UID で認証した貢献者
    External(String),
}

impl Identity {
    /// (user_id, ip, external_uid) の組を 1 つの Identity にまとめる
    pub fn resolve(
        user_id: Option<UserId>,
        user_ip: Option<&str>,
        external_uid: Option<&str>,
    ) -> Self {
        if let Some(id) = user_id {
            return Self::Registered(id);
        }
        if let Some(uid) = external_uid.filter(|s| !s.is_empty()) {
            return Self::External(uid.to_string());
        }
        let ip = user_ip.filter(|s| !s.is_empty()).unwrap_or(FALLBACK_IP);
        Self::Anonymous(ip.to_string())
    }

    pub fn is_anonymous(&self) -> bool {
        !matches!(self, Self::Registered(_))
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Registered(id) => Some(*id),
            _ => None,
        }
    }

    /// ロック保持者とスタンプに使う安定したキー
    pub fn holder_key(&self) -> String {
        match self {
            Self::Registered(id) => format!("user:{}", id.get()),
            Self::Anonymous(ip) => format!("ip:{ip}"),
            Self::External(uid) => format!("ext:{uid}"),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.holder_key())
    }
}

/// 読み取り権限の判定に使うロール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Anonymous,
    User,
    SubAdmin,
    Admin,
}

/// タスクを閲覧しようとしている主体
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub identity: Identity,
    pub role: Role,
}

impl Viewer {
    pub fn new(identity: Identity, role: Role) -> Self {
        Self { identity, role }
    }

    pub fn anonymous(ip: impl Into<String>) -> Self {
        Self::new(Identity::Anonymous(ip.into()), Role::Anonymous)
    }

    /// admin と subadmin はどのタスクも読める
    pub fn has_elevated_read(&self) -> bool {
        !self.identity.is_anonymous() && matches!(self.role, Role::Admin | Role::SubAdmin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn user_id_wins_over_other_channels() {
        let identity = Identity::resolve(Some(UserId::new(5)), Some("10.0.0.1"), Some("abc"));
        assert_eq!(identity, Identity::Registered(UserId::new(5)));
    }

    #[test]
    fn external_uid_wins_over_ip() {
        let identity = Identity::resolve(None, Some("10.0.0.1"), Some("abc"));
        assert_eq!(identity, Identity::External("abc".to_string()));
    }

    #[rstest]
    #[case::ip(Some("10.0.0.1"), "10.0.0.1")]
    #[case::missing(None, FALLBACK_IP)]
    #[case::empty(Some(""), FALLBACK_IP)]
    fn anonymous_falls_back_to_loopback(#[case] ip: Option<&str>, #[case] expected: &str) {
        let identity = Identity::resolve(None, ip, None);
        assert_eq!(identity, Identity::Anonymous(expected.to_string()));
    }

    #[test]
    fn holder_keys_are_channel_prefixed() {
        assert_eq!(Identity::Registered(UserId::new(9)).holder_key(), "user:9");
        assert_eq!(Identity::Anonymous("1.2.3.4".into()).holder_key(), "ip:1.2.3.4");
        assert_eq!(Identity::External("x-1".into()).holder_key(), "ext:x-1");
    }

    #[rstest]
    #[case::admin(Role::Admin, true)]
    #[case::subadmin(Role::SubAdmin, true)]
    #[case::user(Role::User, false)]
    fn elevated_read_requires_admin_role(#[case] role: Role, #[case] expected: bool) {
        let viewer = Viewer::new(Identity::Registered(UserId::new(1)), role);
        assert_eq!(viewer.has_elevated_read(), expected);
    }

    #[test]
    fn anonymous_viewer_never_has_elevated_read() {
        let viewer = Viewer::new(Identity::Anonymous("1.1.1.1".into()), Role::Admin);
        assert!(!viewer.has_elevated_read());
    }
}
