use image::Rgba;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::components::tools::{DEFAULT_PEN_COLOR, DEFAULT_PEN_WIDTH, clamp_pen_width};
use crate::ops::ai::{AiProvider, ProviderConfig};
use crate::{log_info, log_warn};

// ============================================================================
// APP SETTINGS - `key=value` lines in the user's config directory
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct AppSettings {
    pub pen_color: Rgba<u8>,
    pub pen_width: f32,
    pub ai_provider: AiProvider,
    pub openai_api_key: String,
    pub anthropic_api_key: String,
    pub gemini_api_key: String,
    /// 0 disables the timeout.
    pub ai_timeout_secs: u64,
    /// Fit the image to the window whenever one is opened.
    pub fit_on_open: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            pen_color: DEFAULT_PEN_COLOR,
            pen_width: DEFAULT_PEN_WIDTH,
            ai_provider: AiProvider::OpenAi,
            openai_api_key: String::new(),
            anthropic_api_key: String::new(),
            gemini_api_key: String::new(),
            ai_timeout_secs: 0,
            fit_on_open: true,
        }
    }
}

impl AppSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/photofe/photofe_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\PhotoFE\photofe_settings.cfg
    /// On macOS:   ~/Library/Application Support/PhotoFE/photofe_settings.cfg
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "windows")]
        {
            let appdata = std::env::var("APPDATA").or_else(|_| std::env::var("USERPROFILE")).ok()?;
            return Some(PathBuf::from(appdata).join("PhotoFE").join("photofe_settings.cfg"));
        }
        #[cfg(target_os = "macos")]
        {
            let home = std::env::var("HOME").ok()?;
            return Some(
                PathBuf::from(home)
                    .join("Library")
                    .join("Application Support")
                    .join("PhotoFE")
                    .join("photofe_settings.cfg"),
            );
        }
        #[cfg(not(any(target_os = "windows", target_os = "macos")))]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .or_else(|_| std::env::var("HOME").map(|h| PathBuf::from(h).join(".config")))
                .ok()?;
            Some(config_dir.join("photofe").join("photofe_settings.cfg"))
        }
    }

    fn color_to_str(c: Rgba<u8>) -> String {
        format!("{},{},{},{}", c[0], c[1], c[2], c[3])
    }

    /// Parse "r,g,b,a"
    fn str_to_color(s: &str) -> Option<Rgba<u8>> {
        let parts: Vec<&str> = s.split(',').collect();
        if parts.len() != 4 {
            return None;
        }
        let mut out = [0u8; 4];
        for (slot, part) in out.iter_mut().zip(parts) {
            *slot = part.trim().parse().ok()?;
        }
        Some(Rgba(out))
    }

    /// Build settings from file contents.  Unknown keys and unparsable values
    /// are skipped, leaving the default in place.
    pub fn parse(content: &str) -> Self {
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let val = val.trim();
            match key.trim() {
                "pen_color" => {
                    if let Some(c) = Self::str_to_color(val) {
                        s.pen_color = c;
                    }
                }
                "pen_width" => {
                    if let Ok(w) = val.parse::<f32>() {
                        s.pen_width = clamp_pen_width(w);
                    }
                }
                "ai_provider" => {
                    if let Some(p) = AiProvider::from_key(val) {
                        s.ai_provider = p;
                    }
                }
                "openai_api_key" => s.openai_api_key = val.to_string(),
                "anthropic_api_key" => s.anthropic_api_key = val.to_string(),
                "gemini_api_key" => s.gemini_api_key = val.to_string(),
                "ai_timeout_secs" => s.ai_timeout_secs = val.parse().unwrap_or(0),
                "fit_on_open" => s.fit_on_open = val == "true",
                _ => {}
            }
        }
        s
    }

    pub fn to_config_string(&self) -> String {
        format!(
            "pen_color={}\n\
             pen_width={}\n\
             ai_provider={}\n\
             openai_api_key={}\n\
             anthropic_api_key={}\n\
             gemini_api_key={}\n\
             ai_timeout_secs={}\n\
             fit_on_open={}\n",
            Self::color_to_str(self.pen_color),
            self.pen_width,
            self.ai_provider.key(),
            self.openai_api_key,
            self.anthropic_api_key,
            self.gemini_api_key,
            self.ai_timeout_secs,
            self.fit_on_open,
        )
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    /// Save settings to disk.  Failures are logged, never fatal.
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        match self.save_to(&path) {
            Ok(()) => log_info!("Settings saved to {}", path.display()),
            Err(e) => log_warn!("Could not save settings to {}: {}", path.display(), e),
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    // ---- AI provider -------------------------------------------------------

    pub fn api_key(&self, provider: AiProvider) -> &str {
        match provider {
            AiProvider::OpenAi => &self.openai_api_key,
            AiProvider::Anthropic => &self.anthropic_api_key,
            AiProvider::Gemini => &self.gemini_api_key,
        }
    }

    pub fn api_key_mut(&mut self, provider: AiProvider) -> &mut String {
        match provider {
            AiProvider::OpenAi => &mut self.openai_api_key,
            AiProvider::Anthropic => &mut self.anthropic_api_key,
            AiProvider::Gemini => &mut self.gemini_api_key,
        }
    }

    /// Client configuration for the selected provider.
    pub fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(self.ai_provider, self.api_key(self.ai_provider).trim());
        if self.ai_timeout_secs > 0 {
            config.timeout = Some(Duration::from_secs(self.ai_timeout_secs));
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_the_file_format() {
        let settings = AppSettings {
            pen_color: Rgba([1, 2, 3, 4]),
            pen_width: 12.5,
            ai_provider: AiProvider::Gemini,
            openai_api_key: "sk-a".into(),
            anthropic_api_key: String::new(),
            gemini_api_key: "g=key".into(),
            ai_timeout_secs: 45,
            fit_on_open: false,
        };
        assert_eq!(AppSettings::parse(&settings.to_config_string()), settings);
    }

    #[test]
    fn bad_values_fall_back_to_defaults() {
        let s = AppSettings::parse(
            "pen_color=1,2,three,4\npen_width=900\nai_provider=skynet\nunknown=1\nno equals sign\n",
        );
        assert_eq!(s.pen_color, DEFAULT_PEN_COLOR);
        assert_eq!(s.pen_width, 50.0);
        assert_eq!(s.ai_provider, AiProvider::OpenAi);
    }

    #[test]
    fn provider_config_uses_selected_key_and_timeout() {
        let mut s = AppSettings::default();
        s.ai_provider = AiProvider::Anthropic;
        s.anthropic_api_key = " sk-ant ".into();
        let config = s.provider_config();
        assert_eq!(config.provider, AiProvider::Anthropic);
        assert_eq!(config.api_key, "sk-ant");
        assert_eq!(config.timeout, None);

        s.ai_timeout_secs = 20;
        assert_eq!(s.provider_config().timeout, Some(Duration::from_secs(20)));
    }

    #[test]
    fn save_and_load_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("photofe_settings.cfg");
        let mut s = AppSettings::default();
        s.pen_width = 7.0;
        s.save_to(&path).unwrap();
        assert_eq!(AppSettings::load_from(&path), s);
        assert_eq!(AppSettings::load_from(&dir.path().join("missing.cfg")), AppSettings::default());
    }
}
