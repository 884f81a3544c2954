//! Achievement catalog table

use agentmart_gamification::default_catalog;
use colored::*;

use crate::display;

pub fn print_catalog() {
    display::section("Achievement Catalog");
    println!(
        "  {:<4} {:<22} {:<10} {:<12} {:>10} {:>7}",
        "", "Name", "Rarity", "Type", "Threshold", "Points"
    );
    println!("  {}", "─".repeat(70).bright_black());

    for achievement in default_catalog() {
        println!(
            "  {:<4} {:<22} {:<10} {:<12} {:>10} {:>7}",
            achievement.badge,
            achievement.name,
            achievement.rarity.display_name(),
            achievement.achievement_type.to_string(),
            achievement.threshold.to_string(),
            achievement.points
        );
        println!("       {}", achievement.description.bright_black());
    }
}
