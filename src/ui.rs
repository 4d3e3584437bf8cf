//! Interface de terminal do checkrun: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso do lote e `console`
//! para estilização com cores. O [`BatchProgress`] acompanha visualmente
//! a execução dos itens no terminal.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::checkpoint::{CheckpointStore, ItemStatus};
use crate::controller::RunReport;

/// Indicador visual de progresso para a execução de um lote.
///
/// Exibe uma barra com a posição atual e mensagens coloridas por item:
/// sucesso (verde) e falha (vermelho). Quando desabilitado, a barra fica
/// oculta e nada é impresso.
pub struct BatchProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Estilo verde para itens concluídos.
    green: Style,
    // Estilo vermelho para itens com falha.
    red: Style,
}

impl BatchProgress {
    /// Cria a barra para `total` itens.
    pub fn new(total: u64, enabled: bool) -> Self {
        let pb = if enabled {
            ProgressBar::new(total)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(style.progress_chars("=> "));
        }
        if enabled {
            pb.enable_steady_tick(Duration::from_millis(100));
        }

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
        }
    }

    /// Atualiza a mensagem para o item em execução.
    pub fn start_item(&self, id: &str) {
        self.pb.set_message(format!("processing {id}"));
    }

    /// Registra o resultado de um item e avança a barra.
    pub fn finish_item(&self, id: &str, succeeded: bool) {
        if succeeded {
            self.pb.println(format!("  {} {id}", self.green.apply_to("✓")));
        } else {
            self.pb.println(format!("  {} {id}", self.red.apply_to("✗")));
        }
        self.pb.inc(1);
    }

    /// Finaliza e remove a barra do terminal.
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

/// Imprime o resumo de uma execução.
pub fn print_report(report: &RunReport) {
    let bold = Style::new().bold();
    let green = Style::new().green();
    let red = Style::new().red();
    let yellow = Style::new().yellow();

    println!();
    println!("{}", bold.apply_to("─── Run Summary ───"));
    println!("  requested  {}", report.requested);
    println!("  executed   {}", report.executed);
    println!("  completed  {}", green.apply_to(report.completed));
    println!("  failed     {}", red.apply_to(report.failed));
    if report.retried > 0 {
        println!("  retried    {}", report.retried);
    }
    println!("  skipped    {}", yellow.apply_to(report.skipped()));
    if report.skipped_exhausted > 0 {
        println!(
            "    {} failed item(s) reached the retry ceiling",
            report.skipped_exhausted
        );
    }
    if report.skipped_missing + report.skipped_invalid > 0 {
        println!(
            "    {} item(s) without usable configuration",
            report.skipped_missing + report.skipped_invalid
        );
    }
}

/// Imprime a tabela de status do checkpoint.
pub fn print_checkpoint(store: &CheckpointStore) {
    let bold = Style::new().bold();
    println!("{}", bold.apply_to(format!("Checkpoint: {}", store.path().display())));

    if store.is_empty() {
        println!("  (no items recorded)");
        return;
    }

    for (id, record) in store.records() {
        let style = match record.status {
            ItemStatus::Completed => Style::new().green(),
            ItemStatus::Failed => Style::new().red(),
            ItemStatus::Pending => Style::new().yellow(),
        };
        let when = record
            .timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<10} attempts={:<3} {}",
            id,
            style.apply_to(record.status),
            record.attempts,
            when
        );
    }

    let counts = store.counts();
    println!();
    println!(
        "  {} completed, {} failed, {} pending",
        counts.completed, counts.failed, counts.pending
    );
}
