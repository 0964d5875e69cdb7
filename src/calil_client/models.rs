// Response DTOs for the Calil endpoints

use std::collections::HashMap;

use serde::Deserialize;

/// One physical library branch, as returned by `/library`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LibraryBranch {
    #[serde(rename = "systemid", deserialize_with = "de::null_as_default")]
    pub system_id: String,
    #[serde(rename = "systemname", deserialize_with = "de::null_as_default")]
    pub system_name: String,
    #[serde(rename = "libkey", deserialize_with = "de::null_as_default")]
    pub lib_key: String,
    #[serde(rename = "libid", deserialize_with = "de::string_from_str_or_num")]
    pub lib_id: String,
    #[serde(rename = "short", deserialize_with = "de::null_as_default")]
    pub short_name: String,
    #[serde(rename = "formal", deserialize_with = "de::null_as_default")]
    pub formal_name: String,
    #[serde(deserialize_with = "de::null_as_default")]
    pub url_pc: String,
    #[serde(deserialize_with = "de::null_as_default")]
    pub address: String,
    #[serde(rename = "pref", deserialize_with = "de::null_as_default")]
    pub prefecture: String,
    #[serde(deserialize_with = "de::null_as_default")]
    pub city: String,
    #[serde(rename = "post", deserialize_with = "de::null_as_default")]
    pub postal_code: String,
    #[serde(rename = "tel", deserialize_with = "de::null_as_default")]
    pub telephone: String,
    #[serde(deserialize_with = "de::null_as_default")]
    pub geocode: String,
    #[serde(deserialize_with = "de::null_as_default")]
    pub category: String,
    #[serde(deserialize_with = "de::null_as_default")]
    pub image: String,
    /// Only filled for geocode searches. Kept as the service sent it.
    #[serde(deserialize_with = "de::string_from_str_or_num")]
    pub distance: String,
}

/// Per-system search state reported by `/check`.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
pub enum CheckStatus {
    #[serde(rename = "OK")]
    Ok,
    /// Same as `Ok`, served from the service's cache.
    Cache,
    Running,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl CheckStatus {
    /// The per-branch states are final.
    pub fn is_ready(self) -> bool {
        matches!(self, CheckStatus::Ok | CheckStatus::Cache)
    }
}

/// Lending status of one ISBN within one library system.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AvailabilityStatus {
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub status: CheckStatus,
    #[serde(rename = "reserveurl", default, deserialize_with = "de::null_as_default")]
    pub reserve_url: String,
    /// Branch key to lending label. Branches without a copy are absent.
    #[serde(rename = "libkey", default, deserialize_with = "de::map_or_empty_array")]
    pub lib_keys: HashMap<String, String>,
}

impl AvailabilityStatus {
    /// Every branch holding a copy, with its raw label and the parsed state if the label is known.
    pub fn branch_states(&self) -> impl Iterator<Item = (&str, &str, Option<LendingState>)> {
        self.lib_keys
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str(), LendingState::from_label(v)))
    }
}

/// Result of a `/check` call, either the first one or a continuation.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct AvailabilityResult {
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub session: String,
    /// ISBN -> system id -> status.
    #[serde(default, deserialize_with = "de::null_as_default")]
    pub books: HashMap<String, HashMap<String, AvailabilityStatus>>,
    /// Set while the service is still collecting results for `session`.
    #[serde(rename = "continue", default, deserialize_with = "de::bool_from_int")]
    pub in_progress: bool,
}

impl AvailabilityResult {
    pub fn status(&self, isbn: &str, system_id: &str) -> Option<&AvailabilityStatus> {
        self.books.get(isbn)?.get(system_id)
    }

    pub fn is_complete(&self) -> bool {
        !self.in_progress
    }
}

/// The eight lending labels the service uses for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LendingState {
    Available,
    InCollection,
    LibraryUseOnly,
    CheckedOut,
    Reserved,
    InPreparation,
    Closed,
    NotHeld,
}

impl LendingState {
    pub const ALL: [LendingState; 8] = [
        LendingState::Available,
        LendingState::InCollection,
        LendingState::LibraryUseOnly,
        LendingState::CheckedOut,
        LendingState::Reserved,
        LendingState::InPreparation,
        LendingState::Closed,
        LendingState::NotHeld,
    ];

    pub fn label(self) -> &'static str {
        match self {
            LendingState::Available => "貸出可",
            LendingState::InCollection => "蔵書あり",
            LendingState::LibraryUseOnly => "館内のみ",
            LendingState::CheckedOut => "貸出中",
            LendingState::Reserved => "予約中",
            LendingState::InPreparation => "準備中",
            LendingState::Closed => "休館中",
            LendingState::NotHeld => "蔵書なし",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        let label = label.trim();
        Self::ALL.into_iter().find(|s| s.label() == label)
    }
}

/// Internal serde helpers
pub mod de {
    use std::collections::HashMap;

    use serde::{Deserialize, Deserializer};

    /// Accept a string or a number and keep it as a string; null -> "".
    pub fn string_from_str_or_num<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum NumOrStr {
            Num(serde_json::Number),
            Str(String),
        }

        let val: Option<NumOrStr> = Option::deserialize(deserializer)?;
        Ok(match val {
            None => String::new(),
            Some(NumOrStr::Num(n)) => n.to_string(),
            Some(NumOrStr::Str(s)) => s,
        })
    }

    /// Treat null like a missing field.
    pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de> + Default,
    {
        Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
    }

    /// `continue` is documented as 0/1; accept booleans as well.
    pub fn bool_from_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum IntOrBool {
            Int(i64),
            Bool(bool),
        }

        let val: Option<IntOrBool> = Option::deserialize(deserializer)?;
        Ok(match val {
            None => false,
            Some(IntOrBool::Int(n)) => n != 0,
            Some(IntOrBool::Bool(b)) => b,
        })
    }

    /// An empty JSON array stands in for an empty object when a system holds no copy.
    pub fn map_or_empty_array<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum MapOrSeq {
            Map(HashMap<String, String>),
            Seq(Vec<serde_json::Value>),
        }

        let val: Option<MapOrSeq> = Option::deserialize(deserializer)?;
        match val {
            None => Ok(HashMap::new()),
            Some(MapOrSeq::Map(m)) => Ok(m),
            Some(MapOrSeq::Seq(s)) if s.is_empty() => Ok(HashMap::new()),
            Some(MapOrSeq::Seq(_)) => Err(serde::de::Error::custom(
                "expected an object of branch states",
            )),
        }
    }
}
