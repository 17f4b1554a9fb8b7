//! # 仮名化（Pseudonymization）
//!
//! サブジェクト ID を決定的・一方向・衝突困難な仮名に変換する。
//!
//! ## 設計方針
//!
//! - **決定的**: 同一ソルト世代では同じ入力が常に同じ仮名を生成する。
//!   消去処理は逆引きインデックスを持たず、仮名を再計算して
//!   ウェアハウス行を特定するため、この性質が必須となる。
//! - **一方向**: SHA-256 にプロセス全体で共有する秘密ソルトを混ぜるため、
//!   仮名から元の ID を復元できない。
//! - **世代管理**: ソルトは不変の世代付き設定として起動時に注入する。
//!   ローテーションは新しい [`SaltConfig`] の注入であり、旧世代を
//!   `previous` として保持している間は進行中の消去を旧仮名でも照合できる。
//!
//! 付随する責務として、ウェアハウスに渡る前の準識別子の一般化
//! （端末モデル文字列の粗化、ロケールの言語タグ化）もここで提供する。

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use sha2::{Digest, Sha256};

use crate::{DomainError, subject::SubjectId};

/// 仮名（仮名化されたサブジェクト識別子）
///
/// ウェアハウス行のキーとして使用される。生のサブジェクト ID と異なり
/// ログ・監査ログへの出力が許される。
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize, derive_more::Display,
)]
#[display("{_0}")]
pub struct Pseudonym(String);

impl Pseudonym {
    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 既存の仮名文字列から復元する（DB 読み出し用）
    pub fn from_string(value: String) -> Self {
        Self(value)
    }
}

/// 世代付きソルト設定
///
/// 起動時に一度だけ構築される読み取り専用の値。インプレース変更は存在せず、
/// ローテーションは世代番号を進めた新しい値の注入で表現する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaltConfig {
    epoch:  u32,
    secret: String,
}

impl SaltConfig {
    /// ソルト設定を構築する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 秘密値が空の場合。
    ///   仮名化なしでパイプラインを動かすことはできないため、
    ///   起動時にフェイルクローズする
    pub fn new(epoch: u32, secret: impl Into<String>) -> Result<Self, DomainError> {
        let secret = secret.into();
        if secret.trim().is_empty() {
            return Err(DomainError::Validation(
                "仮名化ソルトは必須です".to_string(),
            ));
        }
        Ok(Self { epoch, secret })
    }

    pub fn epoch(&self) -> u32 {
        self.epoch
    }
}

/// 仮名化器
///
/// 現行ソルトと、ローテーション猶予中の旧ソルト（任意）を保持する。
/// 通常の同期経路は現行ソルトのみを使い、消去経路は
/// [`erasure_pseudonyms`](Self::erasure_pseudonyms) で新旧両方の仮名を得る。
#[derive(Debug, Clone)]
pub struct Pseudonymizer {
    current:  SaltConfig,
    previous: Option<SaltConfig>,
}

impl Pseudonymizer {
    pub fn new(current: SaltConfig, previous: Option<SaltConfig>) -> Self {
        Self { current, previous }
    }

    /// 現行ソルト世代でサブジェクト ID を仮名化する
    pub fn pseudonymize(&self, subject_id: &SubjectId) -> Pseudonym {
        Self::derive(&self.current, subject_id)
    }

    /// 消去用: 現行と旧世代（保持中の場合）の仮名をすべて返す
    ///
    /// ソルトローテーション直後でも、旧世代の仮名でキーされた
    /// ウェアハウス行を取り残さないために使用する。
    pub fn erasure_pseudonyms(&self, subject_id: &SubjectId) -> Vec<Pseudonym> {
        let mut pseudonyms = vec![Self::derive(&self.current, subject_id)];
        if let Some(previous) = &self.previous {
            let old = Self::derive(previous, subject_id);
            if old != pseudonyms[0] {
                pseudonyms.push(old);
            }
        }
        pseudonyms
    }

    /// 現行ソルトの世代番号
    pub fn epoch(&self) -> u32 {
        self.current.epoch()
    }

    fn derive(salt: &SaltConfig, subject_id: &SubjectId) -> Pseudonym {
        let mut hasher = Sha256::new();
        hasher.update(salt.epoch.to_be_bytes());
        hasher.update(b":");
        hasher.update(salt.secret.as_bytes());
        hasher.update(b":");
        hasher.update(subject_id.as_uuid().as_bytes());
        let digest = hasher.finalize();
        Pseudonym(URL_SAFE_NO_PAD.encode(digest))
    }
}

/// 端末モデル文字列を端末クラスに粗化する
///
/// `"iPhone15,2"` のような個体をほぼ特定できる準識別子を
/// `"iphone"` のような粗いクラスに落とす。未知のモデルは
/// 先頭の英字部分のみを小文字化して返し、それも無ければ `"unknown"`。
pub fn generalize_device_model(model: &str) -> String {
    let model = model.trim();
    let lowered = model.to_lowercase();

    for (prefix, class) in [
        ("iphone", "iphone"),
        ("ipad", "ipad"),
        ("sm-", "samsung_galaxy"),
        ("pixel", "google_pixel"),
        ("mac", "mac"),
    ] {
        if lowered.starts_with(prefix) {
            return class.to_string();
        }
    }

    let alpha: String = lowered.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    if alpha.is_empty() {
        "unknown".to_string()
    } else {
        alpha
    }
}

/// ロケールを言語タグに粗化する
///
/// `"ja-JP"` → `"ja"`。地域サブタグは準識別子になり得るため落とす。
/// 空の場合は BCP 47 の未定義言語タグ `"und"` を返す。
pub fn generalize_locale(locale: &str) -> String {
    let language = locale
        .trim()
        .split(['-', '_'])
        .next()
        .unwrap_or("")
        .to_lowercase();
    if language.is_empty() {
        "und".to_string()
    } else {
        language
    }
}
