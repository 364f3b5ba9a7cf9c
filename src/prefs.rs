//! Per-device preferences stored as plain strings in FastCache.

use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::store::{keys, FastCache, StoreResult};

pub const MIN_SIZE_SCALE: f64 = 0.5;
pub const MAX_SIZE_SCALE: f64 = 3.0;
pub const SIZE_SCALE_STEP: f64 = 0.2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
  #[default]
  He,
  En,
}

impl Language {
  pub fn code(self) -> &'static str {
    match self {
      Language::He => "he",
      Language::En => "en",
    }
  }

  pub fn is_rtl(self) -> bool {
    self == Language::He
  }
}

impl fmt::Display for Language {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.code())
  }
}

impl FromStr for Language {
  type Err = std::convert::Infallible;

  /// Anything other than `en` is Hebrew.
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    Ok(if s.trim() == "en" {
      Language::En
    } else {
      Language::He
    })
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Preferences {
  pub autosave: bool,
  pub language: Language,
  pub size_scale: f64,
}

impl Default for Preferences {
  fn default() -> Self {
    Self {
      autosave: true,
      language: Language::He,
      size_scale: 1.0,
    }
  }
}

fn read(cache: &dyn FastCache, key: &str) -> Option<String> {
  match cache.get(key) {
    Ok(value) => value,
    Err(e) => {
      warn!("Failed to read preference {}: {}", key, e);
      None
    }
  }
}

impl Preferences {
  /// Load stored values over `defaults`. Out-of-range or unparsable values are ignored.
  pub fn load(cache: &dyn FastCache, defaults: Preferences) -> Self {
    let mut prefs = defaults;
    if let Some(raw) = read(cache, keys::AUTOSAVE) {
      prefs.autosave = raw == "true";
    }
    if let Some(raw) = read(cache, keys::LANGUAGE) {
      prefs.language = raw.parse().unwrap_or_default();
    }
    if let Some(raw) = read(cache, keys::SIZE_SCALE) {
      match raw.trim().parse::<f64>() {
        Ok(scale) if (MIN_SIZE_SCALE..=MAX_SIZE_SCALE).contains(&scale) => {
          prefs.size_scale = scale;
        }
        _ => warn!("Ignoring stored size scale {:?}", raw),
      }
    }
    prefs
  }

  pub fn save_autosave(cache: &dyn FastCache, enabled: bool) -> StoreResult<()> {
    cache.set(keys::AUTOSAVE, if enabled { "true" } else { "false" })
  }

  pub fn save_language(cache: &dyn FastCache, language: Language) -> StoreResult<()> {
    cache.set(keys::LANGUAGE, language.code())
  }

  /// Step the scale up or down by one increment, clamped, and store it.
  pub fn step_size_scale(&mut self, cache: &dyn FastCache, up: bool) -> StoreResult<f64> {
    let next = if up {
      (self.size_scale + SIZE_SCALE_STEP).min(MAX_SIZE_SCALE)
    } else {
      (self.size_scale - SIZE_SCALE_STEP).max(MIN_SIZE_SCALE)
    };
    if next != self.size_scale {
      self.size_scale = next;
      cache.set(keys::SIZE_SCALE, &next.to_string())?;
    }
    Ok(self.size_scale)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::store::MemoryCache;

  #[test]
  fn test_defaults_when_nothing_stored() {
    let cache = MemoryCache::new();
    assert_eq!(
      Preferences::load(&cache, Preferences::default()),
      Preferences::default()
    );
  }

  #[test]
  fn test_stored_values_override() {
    let cache = MemoryCache::new();
    Preferences::save_autosave(&cache, false).unwrap();
    Preferences::save_language(&cache, Language::En).unwrap();
    cache.set(keys::SIZE_SCALE, "1.4").unwrap();

    let prefs = Preferences::load(&cache, Preferences::default());
    assert!(!prefs.autosave);
    assert_eq!(prefs.language, Language::En);
    assert_eq!(prefs.size_scale, 1.4);
  }

  #[test]
  fn test_out_of_range_scale_ignored() {
    let cache = MemoryCache::new();
    cache.set(keys::SIZE_SCALE, "9").unwrap();
    cache.set(keys::LANGUAGE, "fr").unwrap();
    let prefs = Preferences::load(&cache, Preferences::default());
    assert_eq!(prefs.size_scale, 1.0);
    assert_eq!(prefs.language, Language::He);

    let english = Preferences {
      language: Language::En,
      ..Preferences::default()
    };
    assert_eq!(Preferences::load(&cache, english).language, Language::He);
  }

  #[test]
  fn test_step_clamps() {
    let cache = MemoryCache::new();
    let mut prefs = Preferences {
      size_scale: 2.9,
      ..Preferences::default()
    };
    assert_eq!(prefs.step_size_scale(&cache, true).unwrap(), MAX_SIZE_SCALE);
    assert_eq!(prefs.step_size_scale(&cache, true).unwrap(), MAX_SIZE_SCALE);
    assert_eq!(
      Preferences::load(&cache, Preferences::default()).size_scale,
      MAX_SIZE_SCALE
    );
  }
}
