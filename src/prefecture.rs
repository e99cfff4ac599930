//! The 47 prefectures with their two-digit JIS codes.
//!
//! Lookups by code and by name both read the same static table, so a
//! `Prefecture` value always carries a matching code/name pair. Anything that
//! fails to resolve degrades to [`Prefecture::UNKNOWN`].

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Prefecture {
    code: &'static str,
    name: &'static str,
}

impl Prefecture {
    pub const UNKNOWN: Prefecture = Prefecture {
        code: "00",
        name: "unknown",
    };

    const fn new(code: &'static str, name: &'static str) -> Self {
        Self { code, name }
    }

    pub fn code(&self) -> &'static str {
        self.code
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::UNKNOWN
    }

    /// Directory segment used in the canonical layout, e.g. `13_東京都`.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.code, self.name)
    }
}

impl fmt::Display for Prefecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.code, self.name)
    }
}

pub const PREFECTURES: [Prefecture; 47] = [
    Prefecture::new("01", "北海道"),
    Prefecture::new("02", "青森県"),
    Prefecture::new("03", "岩手県"),
    Prefecture::new("04", "宮城県"),
    Prefecture::new("05", "秋田県"),
    Prefecture::new("06", "山形県"),
    Prefecture::new("07", "福島県"),
    Prefecture::new("08", "茨城県"),
    Prefecture::new("09", "栃木県"),
    Prefecture::new("10", "群馬県"),
    Prefecture::new("11", "埼玉県"),
    Prefecture::new("12", "千葉県"),
    Prefecture::new("13", "東京都"),
    Prefecture::new("14", "神奈川県"),
    Prefecture::new("15", "新潟県"),
    Prefecture::new("16", "富山県"),
    Prefecture::new("17", "石川県"),
    Prefecture::new("18", "福井県"),
    Prefecture::new("19", "山梨県"),
    Prefecture::new("20", "長野県"),
    Prefecture::new("21", "岐阜県"),
    Prefecture::new("22", "静岡県"),
    Prefecture::new("23", "愛知県"),
    Prefecture::new("24", "三重県"),
    Prefecture::new("25", "滋賀県"),
    Prefecture::new("26", "京都府"),
    Prefecture::new("27", "大阪府"),
    Prefecture::new("28", "兵庫県"),
    Prefecture::new("29", "奈良県"),
    Prefecture::new("30", "和歌山県"),
    Prefecture::new("31", "鳥取県"),
    Prefecture::new("32", "島根県"),
    Prefecture::new("33", "岡山県"),
    Prefecture::new("34", "広島県"),
    Prefecture::new("35", "山口県"),
    Prefecture::new("36", "徳島県"),
    Prefecture::new("37", "香川県"),
    Prefecture::new("38", "愛媛県"),
    Prefecture::new("39", "高知県"),
    Prefecture::new("40", "福岡県"),
    Prefecture::new("41", "佐賀県"),
    Prefecture::new("42", "長崎県"),
    Prefecture::new("43", "熊本県"),
    Prefecture::new("44", "大分県"),
    Prefecture::new("45", "宮崎県"),
    Prefecture::new("46", "鹿児島県"),
    Prefecture::new("47", "沖縄県"),
];

// Short forms whose official suffix is not 県.
const SUFFIX_EXCEPTIONS: [(&str, &str); 3] = [
    ("東京", "東京都"),
    ("京都", "京都府"),
    ("大阪", "大阪府"),
];

const GENERIC_SUFFIX: &str = "県";

static BY_NAME: LazyLock<HashMap<&'static str, Prefecture>> =
    LazyLock::new(|| PREFECTURES.iter().map(|pref| (pref.name, *pref)).collect());

pub fn by_code(code: &str) -> Option<Prefecture> {
    let code = code.trim();
    PREFECTURES.iter().find(|pref| pref.code == code).copied()
}

pub fn by_name(name: &str) -> Option<Prefecture> {
    BY_NAME.get(name).copied()
}

/// Rewrites a free-text label (`"大阪"`, `" 長野 "`) into the official name
/// form used by the table. The result is not guaranteed to exist in the table.
pub fn normalize_label(label: &str) -> String {
    let trimmed = label.trim();
    if BY_NAME.contains_key(trimmed) {
        return trimmed.to_string();
    }
    if let Some((_, official)) = SUFFIX_EXCEPTIONS
        .iter()
        .find(|(short, _)| *short == trimmed)
    {
        return official.to_string();
    }
    format!("{trimmed}{GENERIC_SUFFIX}")
}

pub fn resolve_code(code: &str) -> Prefecture {
    by_code(code).unwrap_or(Prefecture::UNKNOWN)
}

pub fn resolve_label(label: &str) -> Prefecture {
    by_name(&normalize_label(label)).unwrap_or(Prefecture::UNKNOWN)
}
