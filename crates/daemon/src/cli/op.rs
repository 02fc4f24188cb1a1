use std::path::PathBuf;

use anyhow::Context;

use objmount_daemon::{AppConfig, AppState};

/// Shared by every command in one invocation.
#[derive(Debug, Clone)]
pub struct OpContext {
    pub config_path: PathBuf,
    pub state: AppState,
}

impl OpContext {
    /// Load the config at `config_path` and build the storage stack.
    pub fn load(config_path: PathBuf) -> anyhow::Result<Self> {
        let config = AppConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;
        let state = AppState::from_config(&config).context("building storage stack")?;
        Ok(Self { config_path, state })
    }
}

#[async_trait::async_trait]
pub trait Op: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;
    type Output: std::fmt::Display + std::fmt::Debug + Send;

    async fn execute(&self, ctx: &OpContext) -> Result<Self::Output, Self::Error>;
}

/// Generates `Command`, `OpOutput` and `OpError` for a list of
/// `(Variant, OpType)` pairs, plus an [`Op`] impl dispatching to each.
#[macro_export]
macro_rules! command_enum {
    ($(($variant:ident, $op:ty)),* $(,)?) => {
        #[derive(clap::Subcommand, Debug, Clone)]
        pub enum Command {
            $($variant($op),)*
        }

        #[derive(Debug)]
        pub enum OpOutput {
            $($variant(<$op as $crate::cli::op::Op>::Output),)*
        }

        #[derive(Debug, thiserror::Error)]
        pub enum OpError {
            $(
                #[error(transparent)]
                $variant(<$op as $crate::cli::op::Op>::Error),
            )*
        }

        impl std::fmt::Display for OpOutput {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(OpOutput::$variant(output) => write!(f, "{}", output),)*
                }
            }
        }

        #[async_trait::async_trait]
        impl $crate::cli::op::Op for Command {
            type Error = OpError;
            type Output = OpOutput;

            async fn execute(
                &self,
                ctx: &$crate::cli::op::OpContext,
            ) -> Result<Self::Output, Self::Error> {
                match self {
                    $(
                        Command::$variant(op) => op
                            .execute(ctx)
                            .await
                            .map(OpOutput::$variant)
                            .map_err(OpError::$variant),
                    )*
                }
            }
        }
    };
}

#[cfg(test)]
pub fn test_context(dir: &std::path::Path) -> OpContext {
    let mut config = AppConfig::default();
    config.core.shadow.cache_dir = Some(dir.join("shadow"));
    config.backend.container = "scratch".into();
    OpContext {
        config_path: dir.join("config.toml"),
        state: AppState::from_config(&config).unwrap(),
    }
}
