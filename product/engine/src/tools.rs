use crate::config::EngineSettings;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DOWNLOADER_STEM: &str = "yt-dlp";
pub const DOWNLOADER_MODULE: &str = "yt_dlp";
pub const TRANSCODER_STEM: &str = "ffmpeg";
pub const PROBE_STEM: &str = "ffprobe";

pub const INTERPRETER_CANDIDATES: [&str; 2] = ["python3", "python"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Windows,
    MacOs,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::MacOs
        } else {
            Platform::Linux
        }
    }

    pub fn exe_name(self, stem: &str) -> String {
        match self {
            Platform::Windows => format!("{stem}.exe"),
            Platform::MacOs | Platform::Linux => stem.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Packaging {
    Dev,
    Packaged,
}

#[derive(Debug, Clone)]
pub struct ToolLocator {
    resources_dir: PathBuf,
    packaging: Packaging,
    platform: Platform,
}

impl ToolLocator {
    pub fn new(resources_dir: PathBuf, packaging: Packaging, platform: Platform) -> Self {
        Self {
            resources_dir,
            packaging,
            platform,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(
            settings.resources_dir(),
            settings.packaging(),
            Platform::current(),
        )
    }

    /// `resources/bin` once packaged, `vendor/bin` in a source checkout.
    pub fn vendor_bin_dir(&self) -> PathBuf {
        match self.packaging {
            Packaging::Packaged => self.resources_dir.join("bin"),
            Packaging::Dev => self.resources_dir.join("vendor").join("bin"),
        }
    }

    pub fn downloader_module_root(&self) -> PathBuf {
        self.resources_dir.join(DOWNLOADER_STEM)
    }

    /// May not exist on disk.
    pub fn vendored_downloader(&self) -> PathBuf {
        self.vendor_bin_dir()
            .join(self.platform.exe_name(DOWNLOADER_STEM))
    }

    pub fn transcoder(&self) -> Option<PathBuf> {
        first_existing(self.tool_candidates(TRANSCODER_STEM))
    }

    pub fn probe(&self) -> Option<PathBuf> {
        first_existing(self.tool_candidates(PROBE_STEM))
    }

    /// Directory prepended to `PATH` so the downloader finds a vendored
    /// transcoder on its own.
    pub fn search_path_dir(&self) -> PathBuf {
        self.transcoder()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| self.vendor_bin_dir())
    }

    pub fn transcoder_commands(&self) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        if let Some(vendored) = self.transcoder() {
            out.push(vendored);
        }
        for name in [self.platform.exe_name(TRANSCODER_STEM), TRANSCODER_STEM.to_string()] {
            let candidate = PathBuf::from(name);
            if !out.contains(&candidate) {
                out.push(candidate);
            }
        }
        out
    }

    pub fn resolve(&self) -> ResolvedTools {
        let downloader = self.vendored_downloader();
        ResolvedTools {
            downloader_present: downloader.is_file(),
            downloader,
            transcoder: self.transcoder(),
            probe: self.probe(),
            search_path_dir: self.search_path_dir(),
            module_root: self.downloader_module_root(),
        }
    }

    // Flat, nested-by-name, and nested-by-name with a bin/ folder.
    fn tool_candidates(&self, stem: &str) -> Vec<PathBuf> {
        let exe = self.platform.exe_name(stem);
        let bin = self.vendor_bin_dir();
        vec![
            bin.join(&exe),
            bin.join(stem).join(&exe),
            bin.join(stem).join("bin").join(&exe),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedTools {
    pub downloader: PathBuf,
    pub downloader_present: bool,
    pub transcoder: Option<PathBuf>,
    pub probe: Option<PathBuf>,
    pub search_path_dir: PathBuf,
    pub module_root: PathBuf,
}

impl ResolvedTools {
    pub fn debug_lines(&self) -> Vec<String> {
        vec![
            format!(
                "[debug] vendoredYtDlp={} exists={}",
                self.downloader.to_string_lossy(),
                self.downloader_present
            ),
            format!(
                "[debug] ffmpeg={} | ffprobe={}",
                describe_optional(self.transcoder.as_deref()),
                describe_optional(self.probe.as_deref())
            ),
            format!(
                "[debug] searchPath={}",
                self.search_path_dir.to_string_lossy()
            ),
        ]
    }
}

fn describe_optional(path: Option<&Path>) -> String {
    match path {
        Some(p) => p.to_string_lossy().to_string(),
        None => "<not vendored>".to_string(),
    }
}

fn first_existing(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates.into_iter().find(|p| p.is_file())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        std::fs::write(path, b"").expect("touch");
    }

    #[test]
    fn vendor_dir_depends_on_packaging() {
        let root = PathBuf::from("/opt/app");
        let dev = ToolLocator::new(root.clone(), Packaging::Dev, Platform::Linux);
        let packaged = ToolLocator::new(root.clone(), Packaging::Packaged, Platform::Linux);
        assert_eq!(dev.vendor_bin_dir(), root.join("vendor").join("bin"));
        assert_eq!(packaged.vendor_bin_dir(), root.join("bin"));
    }

    #[test]
    fn windows_names_carry_exe_suffix() {
        let locator = ToolLocator::new(PathBuf::from("C:/app"), Packaging::Packaged, Platform::Windows);
        assert!(locator
            .vendored_downloader()
            .to_string_lossy()
            .ends_with("yt-dlp.exe"));
        assert_eq!(
            locator.transcoder_commands(),
            vec![PathBuf::from("ffmpeg.exe"), PathBuf::from("ffmpeg")]
        );
    }

    #[test]
    fn missing_tools_resolve_to_none() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = ToolLocator::new(dir.path().to_path_buf(), Packaging::Dev, Platform::Linux);
        let resolved = locator.resolve();
        assert!(!resolved.downloader_present);
        assert!(resolved.transcoder.is_none());
        assert!(resolved.probe.is_none());
        assert_eq!(resolved.search_path_dir, locator.vendor_bin_dir());
        assert_eq!(locator.transcoder_commands(), vec![PathBuf::from("ffmpeg")]);
    }

    #[test]
    fn flat_layout_is_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = ToolLocator::new(dir.path().to_path_buf(), Packaging::Packaged, Platform::Linux);
        let bin = locator.vendor_bin_dir();
        touch(&bin.join("ffmpeg"));
        assert_eq!(locator.transcoder(), Some(bin.join("ffmpeg")));
        assert_eq!(locator.search_path_dir(), bin);
    }

    #[test]
    fn nested_layouts_are_searched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = ToolLocator::new(dir.path().to_path_buf(), Packaging::Packaged, Platform::Linux);
        let bin = locator.vendor_bin_dir();
        let nested_ffmpeg = bin.join("ffmpeg").join("bin").join("ffmpeg");
        let nested_ffprobe = bin.join("ffprobe").join("ffprobe");
        touch(&nested_ffmpeg);
        touch(&nested_ffprobe);

        assert_eq!(locator.transcoder(), Some(nested_ffmpeg.clone()));
        assert_eq!(locator.probe(), Some(nested_ffprobe));
        assert_eq!(
            locator.search_path_dir(),
            bin.join("ffmpeg").join("bin")
        );
        assert_eq!(
            locator.transcoder_commands(),
            vec![nested_ffmpeg, PathBuf::from("ffmpeg")]
        );
    }

    #[test]
    fn vendored_downloader_is_detected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let locator = ToolLocator::new(dir.path().to_path_buf(), Packaging::Dev, Platform::Linux);
        touch(&locator.vendored_downloader());
        let resolved = locator.resolve();
        assert!(resolved.downloader_present);
        assert!(resolved.debug_lines()[0].ends_with("exists=true"));
    }
}
