//! Target languages for labels and the detector that picks one
//!
//! A language decides three things downstream: the name written into the
//! labeling prompt, the script a valid label must contain, and the localized
//! placeholder used when no label can be produced.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Supported label languages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum Language {
    English,
    Arabic,
    French,
    Spanish,
    German,
    Chinese,
    Japanese,
    Korean,
    Russian,
    Portuguese,
}

/// Writing systems with a distinguishing character range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Arabic,
    Han,
    Kana,
    Hangul,
    Cyrillic,
}

impl Script {
    pub fn contains(self, c: char) -> bool {
        match self {
            Script::Arabic => matches!(c,
                '\u{0600}'..='\u{06FF}'
                | '\u{0750}'..='\u{077F}'
                | '\u{08A0}'..='\u{08FF}'
                | '\u{FB50}'..='\u{FDFF}'
                | '\u{FE70}'..='\u{FEFF}'),
            Script::Han => matches!(c,
                '\u{4E00}'..='\u{9FFF}'
                | '\u{3400}'..='\u{4DBF}'
                | '\u{F900}'..='\u{FAFF}'),
            Script::Kana => matches!(c, '\u{3040}'..='\u{30FF}' | '\u{31F0}'..='\u{31FF}'),
            Script::Hangul => matches!(c,
                '\u{AC00}'..='\u{D7AF}'
                | '\u{1100}'..='\u{11FF}'
                | '\u{3130}'..='\u{318F}'),
            Script::Cyrillic => matches!(c, '\u{0400}'..='\u{04FF}' | '\u{0500}'..='\u{052F}'),
        }
    }
}

impl Language {
    pub const ALL: [Language; 10] = [
        Language::English,
        Language::Arabic,
        Language::French,
        Language::Spanish,
        Language::German,
        Language::Chinese,
        Language::Japanese,
        Language::Korean,
        Language::Russian,
        Language::Portuguese,
    ];

    /// Display name, as written into prompts
    pub fn name(self) -> &'static str {
        match self {
            Language::English => "English",
            Language::Arabic => "Arabic",
            Language::French => "French",
            Language::Spanish => "Spanish",
            Language::German => "German",
            Language::Chinese => "Chinese",
            Language::Japanese => "Japanese",
            Language::Korean => "Korean",
            Language::Russian => "Russian",
            Language::Portuguese => "Portuguese",
        }
    }

    /// ISO 639-1 code
    pub fn code(self) -> &'static str {
        match self {
            Language::English => "en",
            Language::Arabic => "ar",
            Language::French => "fr",
            Language::Spanish => "es",
            Language::German => "de",
            Language::Chinese => "zh",
            Language::Japanese => "ja",
            Language::Korean => "ko",
            Language::Russian => "ru",
            Language::Portuguese => "pt",
        }
    }

    pub fn is_rtl(self) -> bool {
        matches!(self, Language::Arabic)
    }

    /// Scripts a label must draw at least one character from.
    /// Empty for Latin-script languages, which have no distinguishing range.
    pub fn required_scripts(self) -> &'static [Script] {
        match self {
            Language::Arabic => &[Script::Arabic],
            Language::Chinese => &[Script::Han],
            Language::Japanese => &[Script::Kana, Script::Han],
            Language::Korean => &[Script::Hangul],
            Language::Russian => &[Script::Cyrillic],
            _ => &[],
        }
    }

    /// True if `text` satisfies this language's script requirement
    pub fn matches_script(self, text: &str) -> bool {
        let scripts = self.required_scripts();
        scripts.is_empty()
            || text
                .chars()
                .any(|c| scripts.iter().any(|script| script.contains(c)))
    }

    /// Localized last-resort label
    pub fn untitled(self) -> &'static str {
        match self {
            Language::English => "Untitled",
            Language::Arabic => "بدون عنوان",
            Language::French => "Sans titre",
            Language::Spanish => "Sin título",
            Language::German => "Ohne Titel",
            Language::Chinese => "无标题",
            Language::Japanese => "無題",
            Language::Korean => "제목 없음",
            Language::Russian => "Без названия",
            Language::Portuguese => "Sem título",
        }
    }

    /// Accepts ISO codes (with optional region) and English names, case-insensitively.
    pub fn normalize(tag: &str) -> Result<Language> {
        let lowered = tag.trim().to_lowercase();
        let primary = lowered
            .split(|c| c == '-' || c == '_')
            .next()
            .unwrap_or_default();

        let language = match primary {
            "en" | "eng" | "english" => Language::English,
            "ar" | "ara" | "arabic" => Language::Arabic,
            "fr" | "fra" | "french" => Language::French,
            "es" | "spa" | "spanish" => Language::Spanish,
            "de" | "deu" | "german" => Language::German,
            "zh" | "cmn" | "chinese" => Language::Chinese,
            "ja" | "jpn" | "japanese" => Language::Japanese,
            "ko" | "kor" | "korean" => Language::Korean,
            "ru" | "rus" | "russian" => Language::Russian,
            "pt" | "por" | "portuguese" => Language::Portuguese,
            _ => {
                let supported: Vec<&str> = Language::ALL.iter().map(|l| l.code()).collect();
                return Err(Error::InvalidInput(format!(
                    "unsupported language '{}' (supported: {})",
                    tag,
                    supported.join(", ")
                )));
            }
        };
        Ok(language)
    }

    fn from_whatlang(lang: whatlang::Lang) -> Option<Language> {
        use whatlang::Lang;
        match lang {
            Lang::Eng => Some(Language::English),
            Lang::Ara => Some(Language::Arabic),
            Lang::Fra => Some(Language::French),
            Lang::Spa => Some(Language::Spanish),
            Lang::Deu => Some(Language::German),
            Lang::Cmn => Some(Language::Chinese),
            Lang::Jpn => Some(Language::Japanese),
            Lang::Kor => Some(Language::Korean),
            Lang::Rus => Some(Language::Russian),
            Lang::Por => Some(Language::Portuguese),
            _ => None,
        }
    }

    /// Best guess from the writing system alone (short texts often get
    /// attributed to Persian or Urdu when they are Arabic, for instance)
    fn from_script(script: whatlang::Script) -> Option<Language> {
        use whatlang::Script as S;
        match script {
            S::Arabic => Some(Language::Arabic),
            S::Cyrillic => Some(Language::Russian),
            S::Hangul => Some(Language::Korean),
            S::Mandarin => Some(Language::Chinese),
            S::Hiragana | S::Katakana => Some(Language::Japanese),
            _ => None,
        }
    }
}

impl TryFrom<String> for Language {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Language::normalize(&value)
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of auto-detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub language: Language,
    pub confidence: f64,
    /// False when the detector gave up and the default was used
    pub detected: bool,
}

/// Trigram-based language detection with a configured fallback
#[derive(Debug, Clone)]
pub struct LanguageDetector {
    default: Language,
    sample_chars: usize,
}

impl LanguageDetector {
    pub fn new(default: Language) -> Self {
        Self {
            default,
            sample_chars: 4000,
        }
    }

    pub fn detect(&self, text: &str) -> Detection {
        let sample = crate::utils::truncate_chars(text, self.sample_chars);
        let Some(info) = whatlang::detect(sample) else {
            debug!("Language detection inconclusive, using {}", self.default);
            return self.fallback();
        };

        let language = Language::from_whatlang(info.lang())
            .or_else(|| Language::from_script(info.script()));

        match language {
            Some(language) => {
                debug!(
                    "Detected {} (lang={:?}, confidence={:.2})",
                    language,
                    info.lang(),
                    info.confidence()
                );
                Detection {
                    language,
                    confidence: info.confidence(),
                    detected: true,
                }
            }
            None => {
                debug!("Detected unsupported language {:?}, using {}", info.lang(), self.default);
                self.fallback()
            }
        }
    }

    fn fallback(&self) -> Detection {
        Detection {
            language: self.default,
            confidence: 0.0,
            detected: false,
        }
    }
}

impl Default for LanguageDetector {
    fn default() -> Self {
        Self::new(Language::English)
    }
}
