//! Config model and persistence helpers.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Top-level configuration stored in `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Detection service location and wire details.
    pub server: ServerCfg,
    /// Slots shown in the upload form and brand rules.
    pub form: FormCfg,
    /// Client-side file limits.
    pub limits: LimitsCfg,
    /// Notification and post-submit behavior.
    pub feedback: FeedbackCfg,
}

/// Detection service endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerCfg {
    /// Scheme + host (+ port) of the detection site.
    pub base_url: String,
    /// Path of the multipart detection endpoint.
    pub detect_path: String,
    /// Path of the form page that carries the anti-forgery token.
    pub form_path: String,
    /// Fixed anti-forgery token; empty means scrape it from the form page.
    pub csrf_token: String,
    /// Upper bound for one detection request.
    pub request_timeout_secs: u64,
    /// Multipart field name for image parts.
    pub image_field: String,
    /// Multipart field name for the view type paired with each image.
    pub view_field: String,
}

/// Upload form layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormCfg {
    /// Minimum brand name length after trimming.
    pub min_brand_len: usize,
    /// Slots in declaration order.
    pub slots: Vec<SlotCfg>,
}

/// One named image slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotCfg {
    pub name: String,
    pub required: bool,
}

/// File limits enforced before any upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsCfg {
    /// Largest accepted image in bytes.
    pub max_file_bytes: u64,
}

/// User feedback settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackCfg {
    /// How long a notification stays on screen.
    pub notification_secs: u64,
    /// Open the dashboard in a browser after a successful analysis.
    pub open_dashboard_on_success: bool,
    /// Dashboard path relative to `server.base_url`.
    pub dashboard_path: String,
}

impl Config {
    /// Load from disk or create defaults when missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            Ok(toml::from_str(&s)?)
        } else {
            let cfg = Self::default();
            cfg.save(path)?;
            Ok(cfg)
        }
    }

    /// Persist the config as pretty TOML.
    pub fn save(&self, path: &Path) -> Result<()> {
        let s = toml::to_string_pretty(self)?;
        fs::write(path, s)?;
        Ok(())
    }

    /// Request timeout as a `Duration`; zero is bumped to one second.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs.max(1))
    }

    /// Notification lifetime as a `Duration`.
    pub fn notification_ttl(&self) -> Duration {
        Duration::from_secs(self.feedback.notification_secs)
    }

    /// Absolute dashboard URL.
    pub fn dashboard_url(&self) -> String {
        join_url(&self.server.base_url, &self.feedback.dashboard_path)
    }
}

/// Join a base URL and a path without doubling or dropping the slash.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

impl Default for Config {
    /// Defaults match the detection site's development server.
    fn default() -> Self {
        let slot = |name: &str, required: bool| SlotCfg {
            name: name.into(),
            required,
        };
        Self {
            server: ServerCfg {
                base_url: "http://127.0.0.1:8000".into(),
                detect_path: "/detect/".into(),
                form_path: "/".into(),
                csrf_token: "".into(),
                request_timeout_secs: 60,
                image_field: "images".into(),
                view_field: "view_types".into(),
            },
            form: FormCfg {
                min_brand_len: 2,
                slots: vec![
                    slot("front", true),
                    slot("back", true),
                    slot("side", false),
                    slot("barcode", false),
                    slot("other", false),
                ],
            },
            limits: LimitsCfg {
                max_file_bytes: 5 * 1024 * 1024,
            },
            feedback: FeedbackCfg {
                notification_secs: 3,
                open_dashboard_on_success: false,
                dashboard_path: "/dashboard/".into(),
            },
        }
    }
}
