//! Fixed user-facing strings for the resource fallback.
//!
//! Translation is owned elsewhere; callers hand over a resolved locale tag
//! and this module only looks up the fixed keys.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Pt,
    Es,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextKey {
    PreviewUnavailable,
    DownloadOriginal,
}

impl Locale {
    /// Resolve a locale tag such as `pt-BR`, `es_AR` or `es`.
    ///
    /// Anything that is not Spanish falls back to Portuguese.
    pub fn from_tag(tag: &str) -> Self {
        let primary = tag
            .trim()
            .split(['-', '_'])
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match primary.as_str() {
            "es" => Locale::Es,
            _ => Locale::Pt,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Locale::Pt => "pt",
            Locale::Es => "es",
        }
    }

    pub fn text(self, key: TextKey) -> &'static str {
        match (self, key) {
            (Locale::Pt, TextKey::PreviewUnavailable) => "Pré-visualização indisponível",
            (Locale::Pt, TextKey::DownloadOriginal) => "Baixar imagem original",
            (Locale::Es, TextKey::PreviewUnavailable) => "Vista previa no disponible",
            (Locale::Es, TextKey::DownloadOriginal) => "Descargar imagen original",
        }
    }
}

impl std::fmt::Display for Locale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_regional_tags() {
        assert_eq!(Locale::from_tag("pt-BR"), Locale::Pt);
        assert_eq!(Locale::from_tag("es_AR"), Locale::Es);
        assert_eq!(Locale::from_tag("ES"), Locale::Es);
    }

    #[test]
    fn unknown_tags_fall_back_to_portuguese() {
        assert_eq!(Locale::from_tag("en-US"), Locale::Pt);
        assert_eq!(Locale::from_tag(""), Locale::Pt);
    }

    #[test]
    fn every_key_has_text_in_both_locales() {
        for key in [TextKey::PreviewUnavailable, TextKey::DownloadOriginal] {
            assert!(!Locale::Pt.text(key).is_empty());
            assert!(!Locale::Es.text(key).is_empty());
            assert_ne!(Locale::Pt.text(key), Locale::Es.text(key));
        }
    }
}
