use anyhow::{Result, anyhow};
use directories::UserDirs;
use log::info;
use serde::Deserialize;
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Deck {
    pub total_pages: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Camera {
    /// JSON-lines landmark stream; "-" for stdin.
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default = "default_stride")]
    pub frame_stride: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Relay {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Display {
    #[serde(default = "default_indicator_ms")]
    pub indicator_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub meta: Meta,
    pub deck: Deck,
    pub camera: Camera,
    pub relay: Relay,
    pub display: Display,
}

fn default_source() -> String {
    "-".to_string()
}
fn default_stride() -> u32 {
    2
}
fn default_true() -> bool {
    true
}
fn default_indicator_ms() -> u64 {
    800
}

impl Profile {
    pub fn parse(txt: &str) -> Result<Self> {
        let profile: Profile = toml::from_str(txt)?;
        validate_profile(&profile)?;
        Ok(profile)
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfigState {
    pub active_name: String,
    pub profile: Profile,
    pub config_dir: PathBuf,
    pub profiles_dir: PathBuf,
    pub active_ptr: PathBuf,
}

pub fn config_dir() -> Result<PathBuf> {
    let dirs = UserDirs::new().ok_or_else(|| anyhow!("no home directory for this user"))?;
    Ok(dirs.home_dir().join(".config").join("slidectl"))
}

fn default_profile_text() -> &'static str {
    include_str!("../profiles/default.toml")
}

impl DaemonConfigState {
    pub fn load_or_install_default() -> Result<Self> {
        Self::load_from(config_dir()?)
    }

    /// Same as [`Self::load_or_install_default`] rooted at `cfgdir`.
    pub fn load_from(cfgdir: PathBuf) -> Result<Self> {
        let profdir = cfgdir.join("profiles");
        fs::create_dir_all(&profdir)?;

        let def_path = profdir.join("default.toml");
        if !def_path.exists() {
            fs::write(&def_path, default_profile_text())?;
            info!("installed default profile at {}", def_path.display());
        }

        let active_ptr = cfgdir.join("active");
        if !active_ptr.exists() {
            let mut f = fs::File::create(&active_ptr)?;
            f.write_all(b"default")?;
        }

        let active_name = fs::read_to_string(&active_ptr)?.trim().to_string();
        let profile = load_profile(&profdir, &active_name)?;

        Ok(Self {
            active_name,
            profile,
            config_dir: cfgdir,
            profiles_dir: profdir,
            active_ptr,
        })
    }

    pub fn active_path(&self) -> PathBuf {
        self.profiles_dir.join(format!("{}.toml", self.active_name))
    }

    /// Re-read the active profile; on error the previous one stays in effect.
    pub fn reload(&mut self) -> Result<()> {
        self.profile = load_profile(&self.profiles_dir, &self.active_name)?;
        Ok(())
    }

    pub fn set_active(&mut self, name: &str) -> Result<()> {
        let p = self.profiles_dir.join(format!("{name}.toml"));
        if !p.exists() {
            return Err(anyhow!("profile not found: {}", p.display()));
        }
        let profile = load_profile(&self.profiles_dir, name)?;
        fs::write(&self.active_ptr, name.as_bytes())?;
        self.active_name = name.to_string();
        self.profile = profile;
        Ok(())
    }

    pub fn list_profiles(&self) -> Vec<String> {
        let mut v = Vec::new();
        if let Ok(rd) = fs::read_dir(&self.profiles_dir) {
            for e in rd.flatten() {
                if let Some(ext) = e.path().extension() {
                    if ext == "toml" {
                        if let Some(stem) = e.path().file_stem().and_then(|s| s.to_str()) {
                            v.push(stem.to_string());
                        }
                    }
                }
            }
        }
        v.sort();
        v
    }

    pub fn doctor_report(&self, socket: &Path) -> serde_json::Value {
        let source = &self.profile.camera.source;
        let source_ok = source == "-" || Path::new(source).exists();
        serde_json::json!({
            "user": whoami::username(),
            "config_dir": self.config_dir,
            "profiles_dir": self.profiles_dir,
            "active_profile": self.active_name,
            "landmark_source": source,
            "landmark_source_ok": source_ok,
            "socket": socket,
            "socket_present": socket.exists(),
            "hints": {
                "feed": "pipe detector output as JSON lines: {\"handPresent\":true,\"landmarks\":[[x,y,z],...]}",
                "log_level": "RUST_LOG=debug slidectl start"
            }
        })
    }
}

fn load_profile(profdir: &Path, name: &str) -> Result<Profile> {
    let path = profdir.join(format!("{name}.toml"));
    let txt = fs::read_to_string(&path)
        .map_err(|e| anyhow!("failed to read {}: {e}", path.display()))?;
    Profile::parse(&txt).map_err(|e| anyhow!("failed to parse {}: {e}", path.display()))
}

fn validate_profile(p: &Profile) -> Result<()> {
    if p.camera.frame_stride == 0 {
        return Err(anyhow!("camera.frame_stride must be at least 1"));
    }
    if p.camera.source.trim().is_empty() {
        return Err(anyhow!("camera.source must not be empty"));
    }
    if p.display.indicator_ms == 0 {
        return Err(anyhow!("display.indicator_ms must be a positive duration"));
    }
    Ok(())
}
