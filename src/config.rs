/// Process settings read from the environment.
#[derive(Clone, Debug)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub enable_hsts: bool,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds settings from an arbitrary variable source; unparsable values fall back to defaults.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(v: Option<String>, default: T) -> T {
            v.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
        }
        Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parsed(var("PORT"), 3000),
            enable_hsts: var("ENABLE_HSTS")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            database_url: var("DATABASE_URL").filter(|s| !s.is_empty()),
            db_max_connections: parsed(var("DB_MAX_CONNECTIONS"), 5),
        }
    }
}
