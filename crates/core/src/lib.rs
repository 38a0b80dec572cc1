pub mod domain;
pub mod ingest;
pub mod lookup;
pub mod report;
pub mod storage;
pub mod time;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub kis_appkey: Option<String>,
        pub kis_appsecret: Option<String>,
        pub kis_base_url: Option<String>,
        pub dart_api_key: Option<String>,
        pub dart_base_url: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                kis_appkey: std::env::var("KIS_APPKEY").ok(),
                kis_appsecret: std::env::var("KIS_APPSECRET").ok(),
                kis_base_url: std::env::var("KIS_BASE_URL").ok(),
                dart_api_key: std::env::var("DART_API_KEY").ok(),
                dart_base_url: std::env::var("DART_BASE_URL").ok(),
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_kis_appkey(&self) -> anyhow::Result<&str> {
            self.kis_appkey.as_deref().context("KIS_APPKEY is required")
        }

        pub fn require_kis_appsecret(&self) -> anyhow::Result<&str> {
            self.kis_appsecret
                .as_deref()
                .context("KIS_APPSECRET is required")
        }

        pub fn require_dart_api_key(&self) -> anyhow::Result<&str> {
            self.dart_api_key
                .as_deref()
                .context("DART_API_KEY is required")
        }
    }
}
