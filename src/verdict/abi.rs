/// Exit-code conventions spoken by checker programs
///
/// Checkers report their judgment through the process exit code. The mapping
/// is a convention of a checker family, so it is configured per checker
/// rather than fixed: a preset name or an explicit code table.
use crate::config::types::{JudgeError, Result, Verdict};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Known checker families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbiPreset {
    /// `checker in out hint` family: 0 ok, 2/5 wrong answer, 4 presentation error
    InOutHint,
    /// testlib checkers: 0 ok, 1 wrong answer, 2 presentation error,
    /// 4 (dirt) and 8 (unexpected eof) wrong answer
    Testlib,
}

/// Written in configuration as a preset name (`"testlib"`) or as a table
/// from exit code to verdict (`{"0": "OK", "1": "WRONG_ANSWER"}`)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ExitCodeAbi {
    Preset(AbiPreset),
    Custom(BTreeMap<i32, Verdict>),
}

impl<'de> Deserialize<'de> for ExitCodeAbi {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct AbiVisitor;

        impl<'de> serde::de::Visitor<'de> for AbiVisitor {
            type Value = ExitCodeAbi;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a preset name or a map from exit code to verdict")
            }

            fn visit_str<E: serde::de::Error>(self, value: &str) -> std::result::Result<ExitCodeAbi, E> {
                match value {
                    "in_out_hint" => Ok(ExitCodeAbi::Preset(AbiPreset::InOutHint)),
                    "testlib" => Ok(ExitCodeAbi::Preset(AbiPreset::Testlib)),
                    other => Err(E::unknown_variant(other, &["in_out_hint", "testlib"])),
                }
            }

            fn visit_map<M>(self, mut map: M) -> std::result::Result<ExitCodeAbi, M::Error>
            where
                M: serde::de::MapAccess<'de>,
            {
                let mut table = BTreeMap::new();
                while let Some((key, verdict)) = map.next_entry::<String, Verdict>()? {
                    let code = key.trim().parse::<i32>().map_err(|_| {
                        serde::de::Error::custom(format!("exit code must be an integer, got {:?}", key))
                    })?;
                    table.insert(code, verdict);
                }
                Ok(ExitCodeAbi::Custom(table))
            }
        }

        deserializer.deserialize_any(AbiVisitor)
    }
}

impl Default for ExitCodeAbi {
    fn default() -> Self {
        ExitCodeAbi::Preset(AbiPreset::InOutHint)
    }
}

impl ExitCodeAbi {
    pub fn testlib() -> Self {
        ExitCodeAbi::Preset(AbiPreset::Testlib)
    }

    pub fn custom<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (i32, Verdict)>,
    {
        ExitCodeAbi::Custom(entries.into_iter().collect())
    }

    /// Codes missing from the table are `None` and classify as FAILED
    pub fn lookup(&self, code: i32) -> Option<Verdict> {
        match self {
            ExitCodeAbi::Preset(AbiPreset::InOutHint) => match code {
                0 => Some(Verdict::Ok),
                2 | 5 => Some(Verdict::WrongAnswer),
                4 => Some(Verdict::PresentationError),
                _ => None,
            },
            ExitCodeAbi::Preset(AbiPreset::Testlib) => match code {
                0 => Some(Verdict::Ok),
                1 | 4 | 8 => Some(Verdict::WrongAnswer),
                2 => Some(Verdict::PresentationError),
                _ => None,
            },
            ExitCodeAbi::Custom(table) => table.get(&code).copied(),
        }
    }

    pub fn verdict_for(&self, code: i32) -> Verdict {
        self.lookup(code).unwrap_or(Verdict::Failed)
    }

    /// A custom table must at least say which code means OK
    pub fn validate(&self) -> Result<()> {
        if let ExitCodeAbi::Custom(table) = self {
            if !table.values().any(|v| *v == Verdict::Ok) {
                return Err(JudgeError::Config(
                    "custom exit code table has no code mapped to OK".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_out_hint_table() {
        let abi = ExitCodeAbi::default();
        assert_eq!(abi.verdict_for(0), Verdict::Ok);
        assert_eq!(abi.verdict_for(2), Verdict::WrongAnswer);
        assert_eq!(abi.verdict_for(5), Verdict::WrongAnswer);
        assert_eq!(abi.verdict_for(4), Verdict::PresentationError);
        for code in [1, 3, 6, 7, 42, 255, -1, i32::MIN, i32::MAX] {
            assert_eq!(abi.verdict_for(code), Verdict::Failed, "code {}", code);
        }
    }

    #[test]
    fn testlib_table() {
        let abi = ExitCodeAbi::testlib();
        assert_eq!(abi.verdict_for(0), Verdict::Ok);
        assert_eq!(abi.verdict_for(1), Verdict::WrongAnswer);
        assert_eq!(abi.verdict_for(2), Verdict::PresentationError);
        assert_eq!(abi.verdict_for(4), Verdict::WrongAnswer);
        assert_eq!(abi.verdict_for(8), Verdict::WrongAnswer);
        assert_eq!(abi.verdict_for(3), Verdict::Failed);
        assert_eq!(abi.verdict_for(5), Verdict::Failed);
    }

    #[test]
    fn custom_table_overrides_convention() {
        let abi = ExitCodeAbi::custom([(7, Verdict::Ok), (0, Verdict::WrongAnswer)]);
        assert_eq!(abi.verdict_for(7), Verdict::Ok);
        assert_eq!(abi.verdict_for(0), Verdict::WrongAnswer);
        assert_eq!(abi.verdict_for(2), Verdict::Failed);
        assert!(abi.validate().is_ok());
        assert!(ExitCodeAbi::custom([(1, Verdict::WrongAnswer)]).validate().is_err());
    }

    #[test]
    fn deserializes_preset_name_or_table() {
        let preset: ExitCodeAbi = serde_json::from_str("\"testlib\"").unwrap();
        assert_eq!(preset, ExitCodeAbi::testlib());

        let custom: ExitCodeAbi =
            serde_json::from_str(r#"{"0": "OK", "1": "WRONG_ANSWER"}"#).unwrap();
        assert_eq!(custom.verdict_for(1), Verdict::WrongAnswer);
        assert_eq!(custom.verdict_for(2), Verdict::Failed);

        assert!(serde_json::from_str::<ExitCodeAbi>("\"unknown\"").is_err());
    }
}
