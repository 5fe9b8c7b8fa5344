use std::time::Duration;

use envconfig::Envconfig;

use crate::install::InstallSettings;
use crate::install::upgrade::PollSettings;

#[derive(Envconfig, Clone, Debug)]
pub struct OperatorConfig {
    /// Namespace to watch; empty watches every namespace.
    #[envconfig(from = "SYNDESIS_OPERATOR_WATCH_NAMESPACE", default = "")]
    pub watch_namespace: String,

    /// Root of the `route/`, `infrastructure/`, `database/` and `addons/`
    /// manifest directories.
    #[envconfig(
        from = "SYNDESIS_OPERATOR_TEMPLATES_DIR",
        default = "/conf/templates"
    )]
    pub templates_dir: String,

    #[envconfig(
        from = "SYNDESIS_OPERATOR_FIELD_MANAGER",
        default = "syndesis-operator"
    )]
    pub field_manager: String,

    #[envconfig(from = "SYNDESIS_OPERATOR_SWEEP_PAGE_SIZE", default = "200")]
    pub sweep_page_size: u32,

    #[envconfig(
        from = "SYNDESIS_OPERATOR_UPGRADE_POLL_INTERVAL_SECS",
        default = "5"
    )]
    pub upgrade_poll_interval_secs: u64,

    #[envconfig(
        from = "SYNDESIS_OPERATOR_UPGRADE_POLL_TIMEOUT_SECS",
        default = "600"
    )]
    pub upgrade_poll_timeout_secs: u64,

    /// How long an unsupported kind stays quiet after being reported.
    #[envconfig(
        from = "SYNDESIS_OPERATOR_KIND_WARNING_WINDOW_SECS",
        default = "3600"
    )]
    pub kind_warning_window_secs: u64,

    /// Requeue delay after a pass that ended waiting for the platform.
    #[envconfig(from = "SYNDESIS_OPERATOR_REQUEUE_SECS", default = "30")]
    pub requeue_secs: u64,
}

impl OperatorConfig {
    /// Clamp values that would stall or hammer the API server.
    pub fn validated(mut self) -> Self {
        self.sweep_page_size = self.sweep_page_size.clamp(1, 1000);
        self.upgrade_poll_interval_secs = self.upgrade_poll_interval_secs.max(1);
        self.upgrade_poll_timeout_secs = self
            .upgrade_poll_timeout_secs
            .max(self.upgrade_poll_interval_secs);
        self.requeue_secs = self.requeue_secs.max(1);
        self
    }

    pub fn watch_namespace(&self) -> Option<&str> {
        Some(self.watch_namespace.as_str()).filter(|ns| !ns.is_empty())
    }

    pub fn install_settings(&self) -> InstallSettings {
        InstallSettings {
            page_size: self.sweep_page_size,
            poll: PollSettings {
                interval: Duration::from_secs(self.upgrade_poll_interval_secs),
                timeout: Duration::from_secs(self.upgrade_poll_timeout_secs),
            },
        }
    }

    pub fn kind_warning_window(&self) -> Duration {
        Duration::from_secs(self.kind_warning_window_secs)
    }

    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> OperatorConfig {
        OperatorConfig {
            watch_namespace: String::new(),
            templates_dir: "/conf/templates".into(),
            field_manager: "syndesis-operator".into(),
            sweep_page_size: 200,
            upgrade_poll_interval_secs: 5,
            upgrade_poll_timeout_secs: 600,
            kind_warning_window_secs: 3600,
            requeue_secs: 30,
        }
    }

    #[test]
    fn defaults_from_empty_env() {
        let cfg = OperatorConfig::init_from_hashmap(&HashMap::new()).unwrap();
        assert_eq!(cfg.watch_namespace(), None);
        assert_eq!(cfg.templates_dir, "/conf/templates");
        let s = cfg.install_settings();
        assert_eq!(s.page_size, 200);
        assert_eq!(s.poll, PollSettings::default());
        assert_eq!(cfg.kind_warning_window(), Duration::from_secs(3600));
    }

    #[test]
    fn env_overrides() {
        let env = HashMap::from([
            ("SYNDESIS_OPERATOR_WATCH_NAMESPACE".to_string(), "syndesis".to_string()),
            ("SYNDESIS_OPERATOR_SWEEP_PAGE_SIZE".to_string(), "50".to_string()),
        ]);
        let cfg = OperatorConfig::init_from_hashmap(&env).unwrap();
        assert_eq!(cfg.watch_namespace(), Some("syndesis"));
        assert_eq!(cfg.sweep_page_size, 50);
    }

    #[test]
    fn validated_clamps() {
        let mut cfg = base();
        cfg.sweep_page_size = 0;
        cfg.upgrade_poll_interval_secs = 0;
        cfg.upgrade_poll_timeout_secs = 0;
        cfg.requeue_secs = 0;
        let cfg = cfg.validated();
        assert_eq!(cfg.sweep_page_size, 1);
        assert_eq!(cfg.upgrade_poll_interval_secs, 1);
        assert_eq!(cfg.upgrade_poll_timeout_secs, 1);
        assert_eq!(cfg.requeue_secs, 1);

        let mut cfg = base();
        cfg.sweep_page_size = 5000;
        assert_eq!(cfg.validated().sweep_page_size, 1000);
    }
}
