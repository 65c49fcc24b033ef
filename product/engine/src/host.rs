use crate::config::EngineSettings;
use std::path::PathBuf;

pub trait FolderPicker {
    /// `None` when the user cancelled or no picker is available.
    fn pick_folder(&self) -> Option<PathBuf>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoPicker;

impl FolderPicker for NoPicker {
    fn pick_folder(&self) -> Option<PathBuf> {
        None
    }
}

/// The configured default, then the OS downloads folder, then `""`.
pub fn default_output_directory(settings: &EngineSettings) -> String {
    settings
        .default_output_dir
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .or_else(|| dirs::download_dir().map(|p| p.to_string_lossy().to_string()))
        .unwrap_or_default()
}

pub fn picked_directory(picker: &dyn FolderPicker) -> String {
    picker
        .pick_folder()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(PathBuf);

    impl FolderPicker for Fixed {
        fn pick_folder(&self) -> Option<PathBuf> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn cancelled_pick_is_empty() {
        assert_eq!(picked_directory(&NoPicker), "");
        assert_eq!(picked_directory(&Fixed(PathBuf::from("/music"))), "/music");
    }

    #[test]
    fn configured_default_wins_over_the_os_folder() {
        let settings = EngineSettings {
            default_output_dir: Some(" /srv/audio ".to_string()),
            ..EngineSettings::default()
        };
        assert_eq!(default_output_directory(&settings), "/srv/audio");
    }

    #[test]
    fn blank_setting_falls_back_to_the_os_folder() {
        let settings = EngineSettings {
            default_output_dir: Some("  ".to_string()),
            ..EngineSettings::default()
        };
        let expected = dirs::download_dir()
            .map(|p| p.to_string_lossy().to_string())
            .unwrap_or_default();
        assert_eq!(default_output_directory(&settings), expected);
    }
}
