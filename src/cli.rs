//! Interface de linha de comando do checkrun baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (run, status)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// checkrun: executor de lotes com checkpoint e retomada.
#[derive(Debug, Parser)]
#[command(name = "checkrun", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração (padrão: `checkrun.toml`).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa os itens pendentes ou com falha de uma lista.
    Run {
        /// Diretório base de saída (checkpoint, registros e resumo).
        #[arg(long)]
        output_dir: PathBuf,

        /// Arquivo com um identificador de item por linha.
        #[arg(long)]
        sample_list: PathBuf,

        /// Arquivo YAML ou JSON com os detalhes de cada item.
        #[arg(long)]
        sample_sheet: Option<PathBuf>,

        /// Arquivo de checkpoint (substitui `checkpoint_file` da configuração).
        /// Relativo ao diretório atual, não ao diretório de saída.
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Máximo de execuções por item (0 = sem limite).
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Tempo máximo por item em segundos (0 = sem limite).
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Mostra o estado do checkpoint de um diretório de saída.
    Status {
        /// Diretório base de saída.
        #[arg(long)]
        output_dir: PathBuf,

        /// Arquivo de checkpoint (substitui `checkpoint_file` da configuração).
        /// Relativo ao diretório atual, não ao diretório de saída.
        #[arg(long)]
        checkpoint: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_run_subcommand() {
        let cli = Cli::parse_from([
            "checkrun",
            "run",
            "--output-dir",
            "/data/out",
            "--sample-list",
            "samples.txt",
        ]);
        match cli.command {
            Command::Run {
                output_dir,
                sample_list,
                sample_sheet,
                checkpoint,
                max_attempts,
                timeout_secs,
            } => {
                assert_eq!(output_dir, PathBuf::from("/data/out"));
                assert_eq!(sample_list, PathBuf::from("samples.txt"));
                assert!(sample_sheet.is_none());
                assert!(checkpoint.is_none());
                assert!(max_attempts.is_none());
                assert!(timeout_secs.is_none());
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_run_overrides() {
        let cli = Cli::parse_from([
            "checkrun",
            "run",
            "--output-dir",
            "out",
            "--sample-list",
            "samples.txt",
            "--sample-sheet",
            "sheet.yaml",
            "--max-attempts",
            "0",
            "--timeout-secs",
            "600",
        ]);
        match cli.command {
            Command::Run {
                sample_sheet,
                max_attempts,
                timeout_secs,
                ..
            } => {
                assert_eq!(sample_sheet, Some(PathBuf::from("sheet.yaml")));
                assert_eq!(max_attempts, Some(0));
                assert_eq!(timeout_secs, Some(600));
            }
            _ => panic!("expected Run command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from([
            "checkrun",
            "status",
            "--output-dir",
            "out",
            "--config",
            "custom.toml",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(cli.command, Command::Status { .. }));
    }

    #[test]
    fn run_requires_sample_list() {
        let result = Cli::try_parse_from(["checkrun", "run", "--output-dir", "out"]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
