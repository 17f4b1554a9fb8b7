//! # サブジェクト（レコード所有者）
//!
//! レコードを所有し、消去リクエストを行使できる本人を表す。
//! メールアドレス・表示名・アバター参照・IP アドレスは PII であり、
//! `define_pii_string!` で生成した Newtype により Debug 出力がマスクされ、
//! `Display` を持たないためログへの平文出力が構造的に防止される。
//!
//! ウェアハウスに渡ってよいのは仮名（[`Pseudonym`](crate::pseudonym::Pseudonym)）
//! だけであり、このモジュールの PII 型は運用ストアの外に出ない。

use chrono::{DateTime, Utc};

define_uuid_id! {
    /// サブジェクト ID（生の識別子。ウェアハウスには仮名化してから渡す）
    pub struct SubjectId;
}

define_pii_string! {
    /// メールアドレス（PII）
    pub struct EmailAddress {
        label: "メールアドレス",
        max_length: 254,
    }
}

define_pii_string! {
    /// 表示名（PII）
    pub struct DisplayName {
        label: "表示名",
        max_length: 100,
    }
}

define_pii_string! {
    /// アバター画像参照（PII）
    pub struct AvatarUrl {
        label: "アバターURL",
        max_length: 2048,
    }
}

define_pii_string! {
    /// IP アドレス（PII）。IPv6 の最大表記長に合わせて 45 文字まで
    pub struct IpAddress {
        label: "IPアドレス",
        max_length: 45,
    }
}

/// サブジェクトエンティティ
///
/// 運用ストアのルートレコード。消去シーケンスのステップ (b) で削除される。
/// パイプライン本体はサブジェクトを読むだけで、作成・更新は
/// サブジェクト向けエンドポイント（本クレートの範囲外）が行う。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    id: SubjectId,
    email: EmailAddress,
    display_name: Option<DisplayName>,
    avatar_url: Option<AvatarUrl>,
    created_at: DateTime<Utc>,
}

impl Subject {
    /// 既存のデータから復元する
    pub fn from_db(
        id: SubjectId,
        email: EmailAddress,
        display_name: Option<DisplayName>,
        avatar_url: Option<AvatarUrl>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            email,
            display_name,
            avatar_url,
            created_at,
        }
    }

    pub fn id(&self) -> &SubjectId {
        &self.id
    }

    pub fn email(&self) -> &EmailAddress {
        &self.email
    }

    pub fn display_name(&self) -> Option<&DisplayName> {
        self.display_name.as_ref()
    }

    pub fn avatar_url(&self) -> Option<&AvatarUrl> {
        self.avatar_url.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_メールアドレスのdebug出力はマスクされる() {
        let email = EmailAddress::new("taro@example.com").unwrap();

        assert_eq!(format!("{:?}", email), "EmailAddress(\"[REDACTED]\")");
    }

    #[test]
    fn test_ipアドレスのdebug出力はマスクされる() {
        let ip = IpAddress::new("203.0.113.7").unwrap();

        assert_eq!(format!("{:?}", ip), "IpAddress(\"[REDACTED]\")");
    }

    #[test]
    fn test_空のメールアドレスはエラー() {
        assert!(EmailAddress::new("   ").is_err());
    }

    #[test]
    fn test_最大長を超える表示名はエラー() {
        let long = "あ".repeat(101);

        assert!(DisplayName::new(long).is_err());
    }

    #[test]
    fn test_前後の空白はトリムされる() {
        let name = DisplayName::new("  山田太郎  ").unwrap();

        assert_eq!(name.as_str(), "山田太郎");
    }
}
