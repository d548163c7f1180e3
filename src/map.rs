use smallvec::SmallVec;

pub type CellTags = SmallVec<[String; 2]>;

/// Read-only view of per-cell terrain tags that tile rules evaluate against.
pub trait TerrainMap {
    fn in_bounds(&self, x: i32, y: i32) -> bool;

    /// Tags at a cell; empty outside the map.
    fn tags(&self, x: i32, y: i32) -> &[String];

    fn has_tag(&self, x: i32, y: i32, tag: &str) -> bool {
        self.tags(x, y).iter().any(|t| t == tag)
    }
}

/// Dense row-major terrain grid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridMap {
    width: u32,
    height: u32,
    cells: Vec<CellTags>,
}

impl GridMap {
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize;
        Self { width, height, cells: vec![CellTags::new(); len] }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if self.in_bounds(x, y) {
            Some(y as usize * self.width as usize + x as usize)
        } else {
            None
        }
    }

    /// Adds `tag` to a cell. Returns false when the cell is outside the map.
    pub fn add_tag(&mut self, x: i32, y: i32, tag: impl Into<String>) -> bool {
        let Some(index) = self.index(x, y) else {
            return false;
        };
        let tag = tag.into();
        let cell = &mut self.cells[index];
        if !cell.contains(&tag) {
            cell.push(tag);
        }
        true
    }

    pub fn set_tags<I, T>(&mut self, x: i32, y: i32, tags: I) -> bool
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let Some(index) = self.index(x, y) else {
            return false;
        };
        self.cells[index].clear();
        for tag in tags {
            let tag = tag.into();
            if !self.cells[index].contains(&tag) {
                self.cells[index].push(tag);
            }
        }
        true
    }

    /// Row-major cell coordinates. Rows or columns past `i32::MAX` cannot be addressed and are left out.
    pub fn coordinates(&self) -> impl Iterator<Item = (i32, i32)> {
        let width = i32::try_from(self.width).unwrap_or(i32::MAX);
        let height = i32::try_from(self.height).unwrap_or(i32::MAX);
        (0..height).flat_map(move |y| (0..width).map(move |x| (x, y)))
    }
}

impl TerrainMap for GridMap {
    fn in_bounds(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    fn tags(&self, x: i32, y: i32) -> &[String] {
        match self.index(x, y) {
            Some(index) => &self.cells[index],
            None => &[],
        }
    }
}
