use std::collections::HashMap;

use sf_core::checksum::stamp;
use sf_core::{
    avatar_asset_ref, card_asset_ref, character_asset_ref, AssetManifest, Bundle, BundleData,
    BundleMetadata, Card, Character, Choice, NavigationGraph, SerializedCard, SerializedCharacter,
    SerializedChoice, SerializedStack, Stack, StoryForgeError, BUNDLE_VERSION, COMPILER_VERSION,
};

const WORDS_PER_MINUTE: usize = 200;

pub struct SerializeInput<'a> {
    pub stack: &'a Stack,
    pub cards: &'a [Card],
    pub choices: &'a [Choice],
    pub characters: &'a [Character],
    pub navigation: NavigationGraph,
    pub assets: AssetManifest,
    pub compiled_at: String,
}

pub fn serialize_card(card: &Card) -> SerializedCard {
    SerializedCard {
        id: card.id.clone(),
        title: card.title.clone(),
        content: card.content.clone(),
        script: card.script.clone().filter(|script| !script.trim().is_empty()),
        image_ref: card
            .image_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|_| card_asset_ref(&card.id)),
        message: card.message.clone(),
        speaker: card.speaker.clone(),
        speaker_type: card.speaker_type.clone(),
        order_index: card.order_index,
    }
}

pub fn serialize_character(character: &Character) -> SerializedCharacter {
    SerializedCharacter {
        id: character.id.clone(),
        name: character.name.clone(),
        appearance: character.appearance.clone(),
        image_refs: character
            .image_urls
            .iter()
            .enumerate()
            .filter(|(_, url)| !url.is_empty())
            .map(|(index, _)| character_asset_ref(&character.id, index))
            .collect(),
        avatar_ref: character
            .avatar_url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|_| avatar_asset_ref(&character.id)),
        order_index: character.order_index,
    }
}

/// Choices whose endpoints both exist, ordered by source card then `order_index`.
pub fn serialize_choices(cards: &[Card], choices: &[Choice]) -> Vec<SerializedChoice> {
    let card_order = cards
        .iter()
        .enumerate()
        .map(|(index, card)| (card.id.as_str(), index))
        .collect::<HashMap<_, _>>();

    let mut serialized = choices
        .iter()
        .filter_map(|choice| {
            let target = choice.target_card_id.as_deref()?;
            let source_order = *card_order.get(choice.source_card_id.as_str())?;
            card_order.get(target)?;
            Some((
                source_order,
                SerializedChoice {
                    id: choice.id.clone(),
                    source_card_id: choice.source_card_id.clone(),
                    label: choice.label.clone(),
                    target_card_id: target.to_string(),
                    order_index: choice.order_index,
                },
            ))
        })
        .collect::<Vec<_>>();
    serialized.sort_by_key(|(source_order, choice)| (*source_order, choice.order_index));
    serialized.into_iter().map(|(_, choice)| choice).collect()
}

pub fn estimate_playtime_minutes(cards: &[Card]) -> u32 {
    let words = cards
        .iter()
        .map(|card| {
            card.content.split_whitespace().count()
                + card
                    .message
                    .as_deref()
                    .map(|message| message.split_whitespace().count())
                    .unwrap_or(0)
        })
        .sum::<usize>();
    words.div_ceil(WORDS_PER_MINUTE) as u32
}

pub fn serialize_bundle(input: SerializeInput<'_>) -> Result<Bundle, StoryForgeError> {
    let SerializeInput {
        stack,
        cards,
        choices,
        characters,
        navigation,
        assets,
        compiled_at,
    } = input;

    let serialized_cards = cards.iter().map(serialize_card).collect::<Vec<_>>();
    let serialized_choices = serialize_choices(cards, choices);
    let mut ordered_characters = characters.iter().collect::<Vec<_>>();
    ordered_characters.sort_by_key(|character| character.order_index);
    let serialized_characters = ordered_characters
        .into_iter()
        .map(serialize_character)
        .collect::<Vec<_>>();

    let metadata = BundleMetadata {
        id: stack.id.clone(),
        name: stack.name.clone(),
        description: stack.description.clone(),
        entry_card_id: navigation.entry_node_id.clone(),
        card_count: serialized_cards.len(),
        choice_count: serialized_choices.len(),
        character_count: serialized_characters.len(),
        asset_count: assets.images.len(),
        dead_end_count: navigation.dead_ends.len(),
        orphan_count: navigation.orphans.len(),
        estimated_playtime_minutes: estimate_playtime_minutes(cards),
        theme: stack.theme.clone(),
        art_style_id: stack.art_style_id.clone(),
        compiler_version: COMPILER_VERSION.to_string(),
    };

    let data = BundleData {
        stack: SerializedStack {
            id: stack.id.clone(),
            name: stack.name.clone(),
            description: stack.description.clone(),
            first_card_id: navigation.entry_node_id.clone(),
            art_style_id: stack.art_style_id.clone(),
            theme: stack.theme.clone(),
        },
        cards: serialized_cards,
        choices: serialized_choices,
        characters: serialized_characters,
        navigation,
    };

    let mut bundle = Bundle {
        version: BUNDLE_VERSION.to_string(),
        compiled_at,
        checksum: String::new(),
        metadata,
        data,
        assets,
    };
    stamp(&mut bundle)?;
    Ok(bundle)
}

#[cfg(test)]
mod serializer_tests {
    use super::*;
    use crate::compiler_test_support::*;
    use crate::graph::build_navigation_graph;

    fn serialize(stack: &Stack, cards: &[Card], choices: &[Choice], compiled_at: &str) -> Bundle {
        serialize_bundle(SerializeInput {
            stack,
            cards,
            choices,
            characters: &[],
            navigation: build_navigation_graph(Some("a"), cards, choices),
            assets: AssetManifest::default(),
            compiled_at: compiled_at.to_string(),
        })
        .expect("serialize should pass")
    }

    #[test]
    fn card_image_becomes_asset_reference() {
        let mut card = cards(&["a"]).remove(0);
        card.image_url = Some("https://cdn.example/a.png".to_string());
        card.script = Some("   ".to_string());
        let serialized = serialize_card(&card);
        assert_eq!(serialized.image_ref.as_deref(), Some("card-a"));
        assert_eq!(serialized.script, None);
    }

    #[test]
    fn character_refs_skip_empty_urls() {
        let character = Character {
            id: "h".to_string(),
            image_urls: vec!["a.png".to_string(), String::new(), "c.png".to_string()],
            avatar_url: Some(String::new()),
            ..Character::default()
        };
        let serialized = serialize_character(&character);
        assert_eq!(serialized.image_refs, vec!["char-h-0", "char-h-2"]);
        assert_eq!(serialized.avatar_ref, None);
    }

    #[test]
    fn choices_sort_by_source_then_order_index() {
        let cards = cards(&["a", "b", "c"]);
        let mut late = choice("late", "a", "c");
        late.order_index = 5;
        let mut early = choice("early", "a", "b");
        early.order_index = 1;
        let from_b = choice("from-b", "b", "c");
        let serialized = serialize_choices(&cards, &[from_b, late, early]);
        let ids = serialized.iter().map(|c| c.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["early", "late", "from-b"]);
    }

    #[test]
    fn same_input_yields_same_checksum_regardless_of_timestamp() {
        let stack = stack(Some("a"));
        let cards = cards(&["a", "b"]);
        let choices = vec![choice("1", "a", "b")];
        let first = serialize(&stack, &cards, &choices, "2026-01-01T00:00:00Z");
        let second = serialize(&stack, &cards, &choices, "2027-01-01T00:00:00Z");
        assert_eq!(first.checksum, second.checksum);
        assert_eq!(first.metadata, second.metadata);
        assert_eq!(first.data, second.data);
    }

    #[test]
    fn changing_a_title_changes_checksum() {
        let stack = stack(Some("a"));
        let mut cards = cards(&["a", "b"]);
        let choices = vec![choice("1", "a", "b")];
        let before = serialize(&stack, &cards, &choices, "t");
        cards[1].title = "Renamed".to_string();
        let after = serialize(&stack, &cards, &choices, "t");
        assert_ne!(before.checksum, after.checksum);
    }

    #[test]
    fn metadata_counts_and_playtime() {
        let stack = stack(Some("a"));
        let mut cards = cards(&["a", "b"]);
        cards[0].content = "word ".repeat(250);
        let bundle = serialize(&stack, &cards, &[choice("1", "a", "b")], "t");
        assert_eq!(bundle.metadata.card_count, 2);
        assert_eq!(bundle.metadata.choice_count, 1);
        assert_eq!(bundle.metadata.dead_end_count, 1);
        assert_eq!(bundle.metadata.estimated_playtime_minutes, 2);
        assert_eq!(bundle.metadata.entry_card_id.as_deref(), Some("a"));
        assert_eq!(bundle.version, BUNDLE_VERSION);
    }
}
