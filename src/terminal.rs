//! Purpose: Terminal `Renderer` for the record view.
//! Exports: `TerminalRenderer`.
//! Role: Lists go to stdout (table or JSON); notices and prompts go to stderr.
//! Invariants: Never prompts when stdin is not a terminal; declines instead unless `--yes`.
//! Invariants: In JSON mode failures are left to the caller, which emits them as JSON on stderr.

use std::io::{self, BufRead, IsTerminal, Write};

use cards::api::{Card, Error};
use cards::view::{CardForm, Renderer, user_message};

pub struct TerminalRenderer {
    json: bool,
    assume_yes: bool,
    show_list: bool,
}

impl TerminalRenderer {
    pub fn new(json: bool, assume_yes: bool) -> Self {
        Self {
            json,
            assume_yes,
            show_list: true,
        }
    }

    /// Turns list rendering off, e.g. when stdout is reserved for a mutation result.
    pub fn with_list(mut self, show_list: bool) -> Self {
        self.show_list = show_list;
        self
    }
}

impl Renderer for TerminalRenderer {
    fn render_list(&mut self, cards: &[Card]) {
        if !self.show_list {
            return;
        }
        if self.json {
            let json = serde_json::to_string_pretty(cards).unwrap_or_else(|_| "[]".to_string());
            println!("{json}");
            return;
        }
        if cards.is_empty() {
            println!("No cards yet.");
            return;
        }
        print!("{}", card_table(cards));
    }

    fn render_diagnostic(&mut self, err: &Error) {
        if !self.json {
            eprintln!("Could not load cards: {}", user_message(err));
        }
    }

    fn notify(&mut self, message: &str) {
        if !self.json {
            eprintln!("{message}");
        }
    }

    fn fill_form(&mut self, form: &CardForm) {
        if !self.json {
            eprintln!("Editing {} ({} elixir)", form.name, form.elixir_cost);
        }
    }

    fn reset_form(&mut self) {}

    fn confirm(&mut self, prompt: &str) -> bool {
        if self.assume_yes {
            return true;
        }
        if !io::stdin().is_terminal() {
            eprintln!("{prompt} declined: stdin is not a terminal (pass --yes to confirm)");
            return false;
        }
        eprint!("{prompt} [y/N] ");
        let _ = io::stderr().flush();
        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }
}

fn card_table(cards: &[Card]) -> String {
    let headers = ["ID", "NAME", "ELIXIR", "RARITY", "TYPE"];
    let rows: Vec<[String; 5]> = cards
        .iter()
        .map(|card| {
            let fields = &card.fields;
            [
                card.id.clone(),
                fields.name.clone(),
                fields.elixir_cost.to_string(),
                fields.rarity.clone().unwrap_or_else(|| "-".to_string()),
                fields.card_type.clone().unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    let mut push_row = |cells: &[&str]| {
        let line: Vec<String> = cells
            .iter()
            .zip(widths)
            .map(|(cell, width)| format!("{cell:<width$}"))
            .collect();
        out.push_str(line.join("  ").trim_end());
        out.push('\n');
    };
    push_row(&headers);
    for row in &rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        push_row(&cells);
    }
    out
}
