//! Configuração do checkrun carregada a partir de `checkrun.toml`.
//!
//! A struct [`CheckrunConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `CHECKRUN_PROCESSOR` tem precedência sobre o arquivo.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{CheckrunError, Result};

/// Nome do arquivo de configuração procurado no diretório atual.
pub const CONFIG_FILE: &str = "checkrun.toml";

/// Variável de ambiente que substitui `processor.program`.
pub const PROCESSOR_ENV: &str = "CHECKRUN_PROCESSOR";

/// Configuração de nível superior carregada de `checkrun.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckrunConfig {
    /// Arquivo de checkpoint, relativo ao diretório de saída.
    #[serde(default = "default_checkpoint_file")]
    pub checkpoint_file: PathBuf,

    /// Diretório dos registros de execução (padrão: `<saída>/logs`).
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Arquivo do resumo da execução, relativo ao diretório de saída.
    #[serde(default = "default_summary_file")]
    pub summary_file: PathBuf,

    /// Máximo de execuções por item antes de parar de retentar (0 = sem limite).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Processador externo invocado para cada item.
    #[serde(default)]
    pub processor: ProcessorConfig,

    /// Agregação de configuração após itens bem-sucedidos.
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

/// Como invocar o processador externo.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    /// Executável (ex.: `python3`).
    #[serde(default = "default_program")]
    pub program: String,

    /// Argumentos antes das flags fixas de cada item (ex.: caminho do script).
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Tempo máximo por item em segundos (0 = sem limite).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Diretório de trabalho do subprocesso.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

/// Onde procurar arquivos de configuração gerados e quais parâmetros extrair.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Subdiretório da saída de cada item com os configs gerados.
    #[serde(default = "default_config_dir")]
    pub config_dir: PathBuf,

    /// Caminhos pontuados (ex.: `training.learning_rate`) copiados para o registro.
    #[serde(default = "default_key_parameters")]
    pub key_parameters: Vec<String>,
}

// Valor padrão do checkpoint: "pipeline_checkpoint.json".
fn default_checkpoint_file() -> PathBuf {
    PathBuf::from("pipeline_checkpoint.json")
}

// Valor padrão do resumo: "pipeline_run_summary.json".
fn default_summary_file() -> PathBuf {
    PathBuf::from("pipeline_run_summary.json")
}

// Valor padrão para execuções máximas: 3.
fn default_max_attempts() -> u32 {
    3
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_args() -> Vec<String> {
    vec!["scripts/run_full_pipeline.py".to_string()]
}

// Valor padrão do timeout: 24 horas.
fn default_timeout_secs() -> u64 {
    24 * 60 * 60
}

fn default_config_dir() -> PathBuf {
    PathBuf::from("temp_configs")
}

fn default_key_parameters() -> Vec<String> {
    [
        "model.type",
        "model.params",
        "training.batch_size",
        "training.learning_rate",
        "training.epochs",
        "training.optimizer",
        "data.window_size",
        "data.step_size",
        "seed",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for CheckrunConfig {
    fn default() -> Self {
        Self {
            checkpoint_file: default_checkpoint_file(),
            log_dir: None,
            summary_file: default_summary_file(),
            max_attempts: default_max_attempts(),
            processor: ProcessorConfig::default(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            timeout_secs: default_timeout_secs(),
            working_dir: None,
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            config_dir: default_config_dir(),
            key_parameters: default_key_parameters(),
        }
    }
}

impl ProcessorConfig {
    /// Timeout efetivo; `None` quando desabilitado.
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }
}

impl CheckrunConfig {
    /// Carrega a configuração de `checkrun.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Carrega a configuração de um caminho explícito.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| CheckrunError::io(format!("reading {}", path.display()), e))?;
            toml::from_str::<CheckrunConfig>(&contents)?
        } else {
            Self::default()
        };

        // Variável de ambiente tem precedência sobre o arquivo de configuração.
        if let Ok(program) = std::env::var(PROCESSOR_ENV)
            && !program.is_empty()
        {
            config.processor.program = program;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.processor.program.trim().is_empty() {
            return Err(CheckrunError::Config(
                "processor.program must not be empty".to_string(),
            ));
        }
        if self.checkpoint_file.as_os_str().is_empty() {
            return Err(CheckrunError::Config(
                "checkpoint_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Substitui o checkpoint por um caminho dado na linha de comando.
    /// Caminhos relativos são resolvidos contra o diretório atual, não
    /// contra o diretório de saída.
    pub fn set_checkpoint_file(&mut self, path: &Path) -> Result<()> {
        self.checkpoint_file = std::path::absolute(path)
            .map_err(|e| CheckrunError::io(format!("resolving {}", path.display()), e))?;
        Ok(())
    }

    /// Caminho do checkpoint para um diretório de saída.
    pub fn checkpoint_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.checkpoint_file)
    }

    /// Diretório dos registros de execução para um diretório de saída.
    pub fn log_dir(&self, output_dir: &Path) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| output_dir.join("logs"))
    }

    /// Caminho do resumo da execução para um diretório de saída.
    pub fn summary_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.summary_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = CheckrunConfig::default();
        assert_eq!(config.checkpoint_file, PathBuf::from("pipeline_checkpoint.json"));
        assert_eq!(config.summary_file, PathBuf::from("pipeline_run_summary.json"));
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.processor.program, "python3");
        assert_eq!(config.processor.args, vec!["scripts/run_full_pipeline.py"]);
        assert_eq!(config.processor.timeout(), Some(Duration::from_secs(86_400)));
        assert_eq!(config.aggregation.config_dir, PathBuf::from("temp_configs"));
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            max_attempts = 5

            [processor]
            program = "/usr/bin/env"
            timeout_secs = 0
        "#;
        let config: CheckrunConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.processor.program, "/usr/bin/env");
        assert_eq!(config.processor.timeout(), None);
        assert_eq!(config.processor.args, vec!["scripts/run_full_pipeline.py"]);
        assert_eq!(config.checkpoint_file, PathBuf::from("pipeline_checkpoint.json"));
    }

    #[test]
    fn load_from_missing_file_falls_back_to_defaults() {
        let tmp = TempDir::new().unwrap();
        let config = CheckrunConfig::load_from(&tmp.path().join("absent.toml")).unwrap();
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn load_rejects_empty_program() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("checkrun.toml");
        std::fs::write(&path, "[processor]\nprogram = \"  \"\n").unwrap();
        // CHECKRUN_PROCESSOR is not set in the test environment.
        if std::env::var(PROCESSOR_ENV).is_err() {
            assert!(CheckrunConfig::load_from(&path).is_err());
        }
    }

    #[test]
    fn paths_resolve_against_output_dir() {
        let config = CheckrunConfig::default();
        let out = Path::new("/data/run");
        assert_eq!(
            config.checkpoint_path(out),
            PathBuf::from("/data/run/pipeline_checkpoint.json")
        );
        assert_eq!(config.log_dir(out), PathBuf::from("/data/run/logs"));
        assert_eq!(
            config.summary_path(out),
            PathBuf::from("/data/run/pipeline_run_summary.json")
        );
    }

    #[test]
    fn cli_checkpoint_resolves_against_cwd() {
        let mut config = CheckrunConfig::default();
        config
            .set_checkpoint_file(Path::new("state/checkpoint.json"))
            .unwrap();
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(
            config.checkpoint_path(Path::new("/data/run")),
            cwd.join("state/checkpoint.json")
        );

        config
            .set_checkpoint_file(Path::new("/var/lib/checkrun/cp.json"))
            .unwrap();
        assert_eq!(
            config.checkpoint_path(Path::new("/data/run")),
            PathBuf::from("/var/lib/checkrun/cp.json")
        );
    }

    #[test]
    fn explicit_log_dir_wins() {
        let config: CheckrunConfig = toml::from_str("log_dir = \"/var/log/checkrun\"").unwrap();
        assert_eq!(
            config.log_dir(Path::new("/data/run")),
            PathBuf::from("/var/log/checkrun")
        );
    }
}
