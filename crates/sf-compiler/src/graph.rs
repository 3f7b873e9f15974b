use std::collections::{HashMap, VecDeque};

use sf_core::{Card, Choice, NavigationEdge, NavigationGraph, NavigationNode};

pub fn resolve_entry_card_id<'a>(first_card_id: Option<&'a str>, cards: &'a [Card]) -> Option<&'a str> {
    if let Some(first) = first_card_id {
        if cards.iter().any(|card| card.id == first) {
            return Some(first);
        }
    }
    cards.first().map(|card| card.id.as_str())
}

pub fn build_navigation_graph(
    entry_card_id: Option<&str>,
    cards: &[Card],
    choices: &[Choice],
) -> NavigationGraph {
    let mut nodes = cards
        .iter()
        .map(|card| NavigationNode {
            card_id: card.id.clone(),
            out_edges: Vec::new(),
            in_edges: Vec::new(),
            is_dead_end: true,
            is_orphan: true,
            depth: -1,
        })
        .collect::<Vec<_>>();

    let mut index_by_id = HashMap::with_capacity(cards.len());
    for (index, card) in cards.iter().enumerate() {
        index_by_id.entry(card.id.as_str()).or_insert(index);
    }

    for choice in choices {
        let Some(target_id) = choice.target_card_id.as_deref() else {
            continue;
        };
        let (Some(&source), Some(&target)) = (
            index_by_id.get(choice.source_card_id.as_str()),
            index_by_id.get(target_id),
        ) else {
            continue;
        };

        let edge = NavigationEdge {
            source_card_id: choice.source_card_id.clone(),
            target_card_id: target_id.to_string(),
            choice_id: choice.id.clone(),
            label: choice.label.clone(),
        };
        nodes[source].is_dead_end = false;
        nodes[source].out_edges.push(edge.clone());
        nodes[target].in_edges.push(edge);
    }

    let entry_index = entry_card_id.and_then(|entry| index_by_id.get(entry).copied());
    if let Some(entry) = entry_index {
        nodes[entry].is_orphan = false;
        nodes[entry].depth = 0;
        let mut queue = VecDeque::from([entry]);

        while let Some(current) = queue.pop_front() {
            let next_depth = nodes[current].depth + 1;
            let targets = nodes[current]
                .out_edges
                .iter()
                .filter_map(|edge| index_by_id.get(edge.target_card_id.as_str()).copied())
                .collect::<Vec<_>>();
            for target in targets {
                if !nodes[target].is_orphan {
                    continue;
                }
                nodes[target].is_orphan = false;
                nodes[target].depth = next_depth;
                queue.push_back(target);
            }
        }
    }

    let dead_ends = nodes
        .iter()
        .filter(|node| node.is_dead_end)
        .map(|node| node.card_id.clone())
        .collect();
    let orphans = nodes
        .iter()
        .filter(|node| node.is_orphan)
        .map(|node| node.card_id.clone())
        .collect();

    NavigationGraph {
        entry_node_id: entry_index.map(|index| nodes[index].card_id.clone()),
        nodes,
        dead_ends,
        orphans,
    }
}
