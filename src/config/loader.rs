use crate::config::config::{AppConfig, Profile};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::path::{Path, PathBuf};

/// 未单独配置密钥时使用的环境变量
pub const GEMINI_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// 选择内置默认值预设的环境变量（development / production）
pub const PROFILE_ENV: &str = "CHATTWIN_PROFILE";

const ENV_PREFIX: &str = "CHATTWIN_";

/// 一条命令实际会调用的外部后端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backends {
    pub embedding: bool,
    pub generation: bool,
}

impl Backends {
    /// 只读写本地文件
    pub const NONE: Self = Self {
        embedding: false,
        generation: false,
    };
    /// 构建索引
    pub const EMBEDDING: Self = Self {
        embedding: true,
        generation: false,
    };
    /// 检索并生成回复
    pub const ALL: Self = Self {
        embedding: true,
        generation: true,
    };
}

/// 配置加载器
pub struct ConfigLoader;

impl ConfigLoader {
    /// 从默认路径加载配置
    ///
    /// 优先级（由低到高）：
    /// 1. `CHATTWIN_PROFILE` 选定的预设（默认 development）
    /// 2. ./chattwin.toml
    /// 3. CHATTWIN_ 前缀的环境变量（`__` 分隔嵌套字段）
    pub fn load() -> Result<AppConfig, figment::Error> {
        Self::load_from(default_config_path())
    }

    /// 从指定路径加载配置
    pub fn load_from(path: impl AsRef<Path>) -> Result<AppConfig, figment::Error> {
        let profile = Self::profile(std::env::var(PROFILE_ENV).ok().as_deref())?;
        let mut config: AppConfig = Self::figment(path.as_ref(), profile).extract()?;
        Self::apply_api_key_fallback(&mut config, std::env::var(GEMINI_API_KEY_ENV).ok());
        Ok(config)
    }

    /// 解析预设名称；未设置时为 development
    pub fn profile(value: Option<&str>) -> Result<Profile, figment::Error> {
        match value {
            None => Ok(Profile::default()),
            Some(value) => value.parse::<Profile>().map_err(figment::Error::from),
        }
    }

    fn figment(path: &Path, profile: Profile) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::for_profile(profile)))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).ignore(&["profile"]).split("__"))
    }

    /// 为空的 Gemini 密钥填充共享密钥
    pub fn apply_api_key_fallback(config: &mut AppConfig, key: Option<String>) {
        let Some(key) = key.filter(|k| !k.trim().is_empty()) else {
            return;
        };
        if config.embedding.api_key.is_empty() {
            config.embedding.api_key = key.clone();
        }
        if config.generation.api_key.is_empty() {
            config.generation.api_key = key;
        }
    }

    /// 验证配置；只检查 `backends` 中会被调用的后端
    pub fn validate(config: &AppConfig, backends: Backends) -> Result<(), ConfigValidationError> {
        if config.retrieval.k == 0 {
            return Err(ConfigValidationError::InvalidK);
        }

        if !(0.0..=1.0).contains(&config.retrieval.lambda) {
            return Err(ConfigValidationError::InvalidLambda(config.retrieval.lambda));
        }

        if config.embedding.dimension == 0 {
            return Err(ConfigValidationError::InvalidDimension);
        }

        if backends.generation {
            match config.generation.backend.as_str() {
                "gemini" => {
                    if config.generation.api_key.is_empty() {
                        return Err(ConfigValidationError::MissingApiKey("generation"));
                    }
                }
                "ollama" => {}
                other => return Err(ConfigValidationError::UnknownBackend(other.to_string())),
            }
        }

        if backends.embedding {
            match config.embedding.backend.as_str() {
                "gemini" => {
                    if config.embedding.api_key.is_empty() {
                        return Err(ConfigValidationError::MissingApiKey("embedding"));
                    }
                }
                "ollama" | "simple" => {}
                other => return Err(ConfigValidationError::UnknownBackend(other.to_string())),
            }
        }

        Ok(())
    }
}

/// 配置验证错误
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ConfigValidationError {
    #[error("检索数量 k 无效，必须大于 0")]
    InvalidK,

    #[error("MMR lambda 必须位于 [0, 1]，当前为 {0}")]
    InvalidLambda(f32),

    #[error("向量维度无效，必须大于 0")]
    InvalidDimension,

    #[error("未知的后端类型: {0}")]
    UnknownBackend(String),

    #[error("{0} 后端缺少 API 密钥")]
    MissingApiKey(&'static str),
}

/// 获取默认配置文件路径
pub fn default_config_path() -> PathBuf {
    PathBuf::from("chattwin.toml")
}

/// 检查配置文件是否存在
pub fn config_exists() -> bool {
    default_config_path().exists()
}
