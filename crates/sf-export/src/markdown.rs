use std::collections::HashMap;
use std::fmt::Write as _;

use sf_compiler::{build_navigation_graph, estimate_playtime_minutes, resolve_entry_card_id};
use sf_core::{Card, Character, Choice, NavigationGraph, Stack};

fn card_order<'a>(cards: &'a [Card], graph: &NavigationGraph) -> Vec<&'a Card> {
    let depth = graph
        .nodes
        .iter()
        .map(|node| (node.card_id.as_str(), node.depth))
        .collect::<HashMap<_, _>>();
    let mut ordered = cards.iter().collect::<Vec<_>>();
    ordered.sort_by_key(|card| {
        let depth = depth.get(card.id.as_str()).copied().unwrap_or(-1);
        (depth < 0, depth, card.order_index)
    });
    ordered
}

fn badges(card: &Card, graph: &NavigationGraph) -> String {
    let mut badges = Vec::new();
    if graph.entry_node_id.as_deref() == Some(card.id.as_str()) {
        badges.push("`entry`");
    }
    if let Some(node) = graph.node(&card.id) {
        if node.is_dead_end {
            badges.push("`ending`");
        }
        if node.is_orphan {
            badges.push("`orphan`");
        }
    }
    if badges.is_empty() {
        String::new()
    } else {
        format!(" {}", badges.join(" "))
    }
}

fn quote(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_string()
            } else {
                format!("> {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Human-readable outline of a story, built straight from the editing model.
pub fn generate_story_markdown(
    stack: &Stack,
    cards: &[Card],
    choices: &[Choice],
    characters: &[Character],
) -> String {
    let entry = resolve_entry_card_id(stack.first_card_id.as_deref(), cards);
    let graph = build_navigation_graph(entry, cards, choices);
    let titles = cards
        .iter()
        .map(|card| (card.id.as_str(), card.title.as_str()))
        .collect::<HashMap<_, _>>();
    let linked_choices = graph
        .nodes
        .iter()
        .map(|node| node.out_edges.len())
        .sum::<usize>();

    let mut out = String::new();
    let _ = writeln!(out, "# {}\n", stack.name);
    if !stack.description.trim().is_empty() {
        let _ = writeln!(out, "{}\n", stack.description.trim());
    }

    let _ = writeln!(out, "| Metric | Value |");
    let _ = writeln!(out, "| --- | --- |");
    let _ = writeln!(out, "| Cards | {} |", cards.len());
    let _ = writeln!(out, "| Choices | {} |", choices.len());
    let _ = writeln!(out, "| Characters | {} |", characters.len());
    let _ = writeln!(out, "| Endings | {} |", graph.dead_ends.len());
    let _ = writeln!(out, "| Orphaned cards | {} |", graph.orphans.len());
    let _ = writeln!(
        out,
        "| Estimated playtime | ~{} min |\n",
        estimate_playtime_minutes(cards)
    );

    if !characters.is_empty() {
        let _ = writeln!(out, "## Characters\n");
        let mut ordered = characters.iter().collect::<Vec<_>>();
        ordered.sort_by_key(|character| character.order_index);
        for character in ordered {
            let _ = writeln!(out, "### {}\n", character.name);
            if !character.appearance.trim().is_empty() {
                let _ = writeln!(out, "{}\n", character.appearance.trim());
            }
        }
    }

    let _ = writeln!(out, "## Cards\n");
    for (index, card) in card_order(cards, &graph).into_iter().enumerate() {
        let _ = writeln!(out, "### {}. {}{}\n", index + 1, card.title, badges(card, &graph));
        if !card.content.trim().is_empty() {
            let _ = writeln!(out, "{}\n", card.content.trim());
        }
        if let Some(speaker) = card.speaker.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(out, "*{}*\n", speaker);
        }
        if let Some(message) = card.message.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
            let _ = writeln!(out, "{}\n", quote(message));
        }

        let mut own = choices
            .iter()
            .filter(|choice| choice.source_card_id == card.id)
            .collect::<Vec<_>>();
        own.sort_by_key(|choice| choice.order_index);
        if !own.is_empty() {
            let _ = writeln!(out, "**Choices**\n");
            for choice in own {
                let target = match choice.target_card_id.as_deref() {
                    None => "_(unlinked)_".to_string(),
                    Some(target) => match titles.get(target) {
                        Some(title) => (*title).to_string(),
                        None => format!("_(missing card `{}`)_", target),
                    },
                };
                let _ = writeln!(out, "- {} → {}", choice.label, target);
            }
            out.push('\n');
        }
    }

    let average = if cards.is_empty() {
        0.0
    } else {
        linked_choices as f64 / cards.len() as f64
    };
    let _ = writeln!(out, "## Graph statistics\n");
    let _ = writeln!(
        out,
        "- Reachable cards: {} of {}",
        graph.reachable_count(),
        cards.len()
    );
    let _ = writeln!(out, "- Linked choices: {}", linked_choices);
    let _ = writeln!(out, "- Longest path from start: {}", graph.max_depth().max(0));
    let _ = writeln!(out, "- Average choices per card: {:.1}\n", average);

    for (heading, ids) in [("Orphaned cards", &graph.orphans), ("Dead ends", &graph.dead_ends)] {
        let _ = writeln!(out, "## {}\n", heading);
        if ids.is_empty() {
            let _ = writeln!(out, "None.\n");
            continue;
        }
        for id in ids {
            let title = titles.get(id.as_str()).copied().unwrap_or(id.as_str());
            let _ = writeln!(out, "- {} (`{}`)", title, id);
        }
        out.push('\n');
    }

    out
}
