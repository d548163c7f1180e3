use std::fmt;
use std::sync::Arc;

use glam::IVec2;
use serde::Deserialize;

use crate::map::TerrainMap;

/// Placement predicate evaluated per map cell. Must be side-effect free.
pub trait TileRule: Send + Sync {
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool;

    fn describe(&self) -> String {
        "custom".to_string()
    }
}

pub type SharedRule = Arc<dyn TileRule>;

impl<F> TileRule for F
where
    F: Fn(&dyn TerrainMap, i32, i32) -> bool + Send + Sync,
{
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        self(map, cell_x, cell_y)
    }
}

/// True iff every rule accepts; stops at the first rejection.
pub fn all_accept(rules: &[SharedRule], map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
    rules.iter().all(|rule| rule.accepts(map, cell_x, cell_y))
}

/// Does the cell at `offset` from (`cell_x`, `cell_y`) carry `tag`? Offsets that leave the
/// coordinate space land off the map, where no tags exist.
fn tagged_at(map: &dyn TerrainMap, cell_x: i32, cell_y: i32, offset: IVec2, tag: &str) -> bool {
    match (cell_x.checked_add(offset.x), cell_y.checked_add(offset.y)) {
        (Some(x), Some(y)) => map.has_tag(x, y, tag),
        _ => false,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequireTerrain {
    pub offset: IVec2,
    pub tag: String,
}

impl RequireTerrain {
    pub fn new(tag: impl Into<String>, dx: i32, dy: i32) -> Self {
        Self { offset: IVec2::new(dx, dy), tag: tag.into() }
    }
}

impl TileRule for RequireTerrain {
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        tagged_at(map, cell_x, cell_y, self.offset, &self.tag)
    }

    fn describe(&self) -> String {
        format!("require({}, {}, {})", self.tag, self.offset.x, self.offset.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForbidTerrain {
    pub offset: IVec2,
    pub tag: String,
}

impl ForbidTerrain {
    pub fn new(tag: impl Into<String>, dx: i32, dy: i32) -> Self {
        Self { offset: IVec2::new(dx, dy), tag: tag.into() }
    }
}

impl TileRule for ForbidTerrain {
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        !tagged_at(map, cell_x, cell_y, self.offset, &self.tag)
    }

    fn describe(&self) -> String {
        format!("forbid({}, {}, {})", self.tag, self.offset.x, self.offset.y)
    }
}

pub struct AllOf(pub Vec<SharedRule>);

impl TileRule for AllOf {
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        all_accept(&self.0, map, cell_x, cell_y)
    }

    fn describe(&self) -> String {
        format!("all_of[{}]", join_descriptions(&self.0))
    }
}

pub struct AnyOf(pub Vec<SharedRule>);

impl TileRule for AnyOf {
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        self.0.iter().any(|rule| rule.accepts(map, cell_x, cell_y))
    }

    fn describe(&self) -> String {
        format!("any_of[{}]", join_descriptions(&self.0))
    }
}

pub struct Not(pub SharedRule);

impl TileRule for Not {
    fn accepts(&self, map: &dyn TerrainMap, cell_x: i32, cell_y: i32) -> bool {
        !self.0.accepts(map, cell_x, cell_y)
    }

    fn describe(&self) -> String {
        format!("negate({})", self.0.describe())
    }
}

fn join_descriptions(rules: &[SharedRule]) -> String {
    rules.iter().map(|rule| rule.describe()).collect::<Vec<_>>().join(", ")
}

/// Rule as written in a tile-set script. Scripts can only name the built-in kinds;
/// Rust callers may attach any [`TileRule`] directly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleDef {
    Require {
        tag: String,
        #[serde(default)]
        dx: i32,
        #[serde(default)]
        dy: i32,
    },
    Forbid {
        tag: String,
        #[serde(default)]
        dx: i32,
        #[serde(default)]
        dy: i32,
    },
    AllOf {
        rules: Vec<RuleDef>,
    },
    AnyOf {
        rules: Vec<RuleDef>,
    },
    Negate {
        rule: Box<RuleDef>,
    },
}

impl RuleDef {
    pub fn build(&self) -> SharedRule {
        match self {
            RuleDef::Require { tag, dx, dy } => Arc::new(RequireTerrain::new(tag.clone(), *dx, *dy)),
            RuleDef::Forbid { tag, dx, dy } => Arc::new(ForbidTerrain::new(tag.clone(), *dx, *dy)),
            RuleDef::AllOf { rules } => Arc::new(AllOf(rules.iter().map(RuleDef::build).collect())),
            RuleDef::AnyOf { rules } => Arc::new(AnyOf(rules.iter().map(RuleDef::build).collect())),
            RuleDef::Negate { rule } => Arc::new(Not(rule.build())),
        }
    }
}

impl fmt::Debug for dyn TileRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::GridMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn crossing() -> GridMap {
        let mut map = GridMap::new(3, 3);
        for (x, y) in [(1, 0), (0, 1), (1, 1), (2, 1), (1, 2)] {
            map.add_tag(x, y, "road");
        }
        map.add_tag(0, 0, "park");
        map
    }

    #[test]
    fn require_and_forbid_look_at_offsets() {
        let map = crossing();
        let straight = RequireTerrain::new("road", 0, 0);
        assert!(straight.accepts(&map, 1, 1));
        assert!(!straight.accepts(&map, 0, 0));

        let road_above = RequireTerrain::new("road", 0, -1);
        assert!(road_above.accepts(&map, 1, 1));
        assert!(!road_above.accepts(&map, 1, 0), "above the map has no tags");

        let no_park_left = ForbidTerrain::new("park", -1, 0);
        assert!(!no_park_left.accepts(&map, 1, 0));
        assert!(no_park_left.accepts(&map, 0, 0), "outside the map is never a park");
    }

    #[test]
    fn offsets_past_the_coordinate_range_are_off_map() {
        let mut map = GridMap::new(2, 2);
        map.add_tag(0, 0, "road");
        assert!(!RequireTerrain::new("road", 1, 0).accepts(&map, i32::MAX, 0));
        assert!(!RequireTerrain::new("road", 0, -1).accepts(&map, 0, i32::MIN));
        assert!(ForbidTerrain::new("road", 1, 1).accepts(&map, i32::MAX, i32::MAX));
        assert!(ForbidTerrain::new("road", -1, 0).accepts(&map, i32::MIN, 0));
        assert!(!ForbidTerrain::new("road", 0, 0).accepts(&map, 0, 0));
    }

    #[test]
    fn combinators_compose() {
        let map = crossing();
        let junction = AllOf(vec![
            Arc::new(RequireTerrain::new("road", 0, 0)),
            Arc::new(AnyOf(vec![
                Arc::new(RequireTerrain::new("road", -1, 0)),
                Arc::new(RequireTerrain::new("road", 1, 0)),
            ])),
            Arc::new(Not(Arc::new(RequireTerrain::new("park", 0, 0)))),
        ]);
        assert!(junction.accepts(&map, 1, 1));
        assert!(!junction.accepts(&map, 1, 0));
        assert!(AllOf(Vec::new()).accepts(&map, 0, 0));
        assert!(!AnyOf(Vec::new()).accepts(&map, 0, 0));
    }

    #[test]
    fn conjunction_stops_at_first_rejection() {
        let map = crossing();
        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let rules: Vec<SharedRule> = vec![
            Arc::new(|_: &dyn TerrainMap, _: i32, _: i32| false),
            Arc::new(move |_: &dyn TerrainMap, _: i32, _: i32| {
                flag.store(true, Ordering::SeqCst);
                true
            }),
        ];
        assert!(!all_accept(&rules, &map, 1, 1));
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn definitions_build_matching_rules() {
        let map = crossing();
        let def = RuleDef::AllOf {
            rules: vec![
                RuleDef::Require { tag: "road".to_string(), dx: 0, dy: 0 },
                RuleDef::Negate { rule: Box::new(RuleDef::Forbid { tag: "road".to_string(), dx: 0, dy: 1 }) },
            ],
        };
        let rule = def.build();
        assert!(rule.accepts(&map, 1, 1));
        assert!(!rule.accepts(&map, 0, 1));
        assert_eq!(rule.describe(), "all_of[require(road, 0, 0), negate(forbid(road, 0, 1))]");
    }
}
