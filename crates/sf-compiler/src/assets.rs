use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sf_core::{
    avatar_asset_ref, card_asset_ref, character_asset_ref, AssetCompression, AssetEntry,
    AssetKind, AssetManifest, Card, Character, StoryForgeError,
};

use crate::issues::{CompileErrorCode, CompileIssue};

/// Supplies bytes for non-`data:` asset URLs; `Ok(None)` means "leave referenced".
pub trait AssetResolver {
    fn resolve(&self, url: &str) -> Result<Option<Vec<u8>>, StoryForgeError>;
}

#[derive(Debug, Clone, Copy)]
pub struct AssetPolicy {
    pub embed: bool,
    pub max_asset_size: u64,
    pub compression: AssetCompression,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssetCollection {
    pub manifest: AssetManifest,
    pub warnings: Vec<CompileIssue>,
}

struct PendingAsset<'a> {
    id: String,
    url: &'a str,
    kind: AssetKind,
    owner_card_id: Option<&'a str>,
}

fn pending_assets<'a>(cards: &'a [Card], characters: &'a [Character]) -> Vec<PendingAsset<'a>> {
    let mut pending = Vec::new();
    for card in cards {
        if let Some(url) = card.image_url.as_deref().filter(|url| !url.is_empty()) {
            pending.push(PendingAsset {
                id: card_asset_ref(&card.id),
                url,
                kind: AssetKind::Card,
                owner_card_id: Some(card.id.as_str()),
            });
        }
    }
    for character in characters {
        for (index, url) in character.image_urls.iter().enumerate() {
            if url.is_empty() {
                continue;
            }
            pending.push(PendingAsset {
                id: character_asset_ref(&character.id, index),
                url,
                kind: AssetKind::Character,
                owner_card_id: None,
            });
        }
        if let Some(url) = character.avatar_url.as_deref().filter(|url| !url.is_empty()) {
            pending.push(PendingAsset {
                id: avatar_asset_ref(&character.id),
                url,
                kind: AssetKind::Avatar,
                owner_card_id: None,
            });
        }
    }
    pending
}

pub fn collect_assets(
    cards: &[Card],
    characters: &[Character],
    policy: AssetPolicy,
    resolver: Option<&dyn AssetResolver>,
) -> AssetCollection {
    let mut images = Vec::new();
    let mut warnings = Vec::new();
    let mut total_size = 0u64;

    for pending in pending_assets(cards, characters) {
        let (mime_type, bytes) = match parse_data_url(pending.url) {
            Some((mime, bytes)) => (Some(mime), Some(bytes)),
            None => {
                let bytes = match resolver.map(|resolver| resolver.resolve(pending.url)) {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(error)) => {
                        warnings.push(CompileIssue::new(
                            CompileErrorCode::AssetUnresolved,
                            format!("Asset {} ({}) could not be read: {}", pending.id, pending.url, error),
                        )
                        .with_card(pending.owner_card_id));
                        None
                    }
                    None => None,
                };
                (mime_from_extension(pending.url), bytes)
            }
        };

        let size = bytes.as_ref().map(|bytes| bytes.len() as u64);
        total_size += size.unwrap_or(0);

        let mut data = None;
        if policy.embed {
            if let Some(bytes) = &bytes {
                if bytes.len() as u64 <= policy.max_asset_size {
                    data = Some(STANDARD.encode(bytes));
                } else {
                    warnings.push(
                        CompileIssue::new(
                            CompileErrorCode::AssetTooLarge,
                            format!(
                                "Asset {} is {} bytes; limit is {} bytes. It stays referenced by URL.",
                                pending.id,
                                bytes.len(),
                                policy.max_asset_size
                            ),
                        )
                        .with_card(pending.owner_card_id),
                    );
                }
            }
        }

        // An embedded data URL keeps only its `data:<mime>` prefix; the payload lives in `data`.
        let url = match (&data, mime_type.as_deref()) {
            (Some(_), Some(mime)) if pending.url.starts_with("data:") => format!("data:{}", mime),
            _ => pending.url.to_string(),
        };
        tracing::debug!(asset = %pending.id, embedded = data.is_some(), "collected asset");
        images.push(AssetEntry {
            id: pending.id,
            url,
            kind: pending.kind,
            mime_type,
            size,
            embedded: data.is_some(),
            data,
        });
    }

    AssetCollection {
        manifest: AssetManifest {
            images,
            total_size,
            compression: policy.compression,
        },
        warnings,
    }
}

/// Decodes `data:<mime>;base64,<payload>` URLs.
pub fn parse_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    let mime = if mime.is_empty() {
        "application/octet-stream"
    } else {
        mime
    };
    Some((mime.to_string(), bytes))
}

pub fn mime_from_extension(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        _ => return None,
    };
    Some(mime.to_string())
}
