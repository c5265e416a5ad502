//! Dev-mode seeding
//!
//! Populates one floor with buildings carrying content for the built-in
//! action pipeline, plus residents to process them.

use serde_json::{json, Value};
use tracing::info;

use crate::acting::Coordinator;
use crate::db::schemas::{BuildingDoc, Content, ResidentDoc};
use crate::life::lot_address;
use crate::store::ResidentStore;
use crate::types::Result;

/// Counts of what was seeded
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub buildings: usize,
    pub residents: usize,
}

pub async fn seed_floor(
    coordinator: &Coordinator,
    floor: &str,
    buildings: usize,
    residents: usize,
) -> Result<SeedReport> {
    for i in 0..buildings {
        coordinator.register_building(seed_building(floor, i)).await?;
    }

    let store = &coordinator.stores().residents;
    for _ in 0..residents {
        store.insert(ResidentDoc::new(floor)).await?;
    }

    info!(floor, buildings, residents, "Seeded floor");
    Ok(SeedReport {
        buildings,
        residents,
    })
}

/// Alternates social posts (with raw content) and bare article text
fn seed_building(floor: &str, i: usize) -> BuildingDoc {
    let address = lot_address(floor, i);
    if i % 2 == 0 {
        let mut building = BuildingDoc::new(address, floor).with_payload(
            "twitter-social-post",
            object(json!({ "url": format!("https://example.org/posts/{}", i) })),
        );
        building.raw = Some(object(json!({ "text": format!("post {}", i) })));
        building
    } else {
        BuildingDoc::new(address, floor).with_payload(
            "article-text",
            object(json!({ "text": format!("article {}", i) })),
        )
    }
}

fn object(value: Value) -> Content {
    match value {
        Value::Object(map) => map,
        _ => Content::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_buildings_alternate() {
        let post = seed_building("3", 0);
        assert_eq!(post.address, "3-0000");
        assert_eq!(post.content_type.as_deref(), Some("twitter-social-post"));
        assert!(post.raw.is_some());

        let article = seed_building("3", 1);
        assert_eq!(article.content_type.as_deref(), Some("article-text"));
        assert!(article.raw.is_none());
        assert!(article.needs_processing());
    }
}
