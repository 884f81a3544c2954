//! Display utilities for the CLI

use agentmart_types::{Achievement, BadgeRarity, Decimal};
use colored::*;

/// Leading glyph of a status line
#[derive(Clone, Copy)]
enum Mark {
    Done,
    Failed,
    Note,
}

impl Mark {
    fn glyph(self) -> ColoredString {
        match self {
            Mark::Done => "✓".green().bold(),
            Mark::Failed => "✗".red().bold(),
            Mark::Note => "·".cyan(),
        }
    }
}

fn status(mark: Mark, message: impl std::fmt::Display) {
    println!("  {} {}", mark.glyph(), message);
}

/// Upper-cased heading over a dimmed rule
pub fn section(title: &str) {
    let width = title.chars().count().max(48);
    println!("\n{}\n{}", title.to_uppercase().bold(), "─".repeat(width).dimmed());
}

pub fn success(message: &str) {
    status(Mark::Done, message);
}

pub fn error(message: &str) {
    status(Mark::Failed, message.red());
}

pub fn info(message: &str) {
    status(Mark::Note, message);
}

/// Key padded to a column, value tinted
pub fn kv(key: &str, value: &str) {
    let label = format!("{key}:");
    println!("    {} {}", format!("{label:<10}").dimmed(), value.cyan());
}

pub fn money(amount: Decimal) -> String {
    format!("${:.2}", amount)
}

/// Rarity name tinted by tier
pub fn rarity(rarity: BadgeRarity) -> ColoredString {
    let name = rarity.display_name();
    match rarity {
        BadgeRarity::Common => name.white(),
        BadgeRarity::Rare => name.bright_blue(),
        BadgeRarity::Epic => name.bright_magenta(),
        BadgeRarity::Legendary => name.bright_yellow().bold(),
    }
}

/// One line announcing an unlocked achievement
pub fn unlocked(achievement: &Achievement) {
    println!(
        "  {} {} {} ({}, +{} pts)",
        "★".bright_yellow(),
        achievement.badge,
        achievement.name.bright_white().bold(),
        rarity(achievement.rarity),
        achievement.points
    );
}
