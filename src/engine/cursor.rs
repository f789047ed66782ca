use crate::engine::panel::SizeClass;

/// First report row available to panels; rows 1-3 hold the title block.
pub const START_ROW: u32 = 4;

/// Printed page height in rows on the fixed A4 grid.
pub const PAGE_CAPACITY: u32 = 48;

/// Page height once the report has run past the first page. The row lost to
/// the page header on continuation pages is reserved as a boundary row.
pub const OVERFLOW_PAGE_CAPACITY: u32 = PAGE_CAPACITY - 1;

/// Rows checked when a section header is placed: the header itself plus the
/// first content row, so a header never ends a page alone.
const HEADER_CHECK_HEIGHT: u32 = 2;

/// Worst-case height of a packed pair of Small panels (Small + MaxMin). The
/// left slot is checked against it because the right panel is not known yet.
const PAIR_CHECK_HEIGHT: u32 = SizeClass::Small.height() + 2;

// Rows where clusters of Large panels on the 48-row grid land one row short
// of the break rule. Tied to the grid constants above; re-derive the window
// before changing PAGE_CAPACITY or the size-class heights.
const PINCH_START: u32 = 95 - SizeClass::Large.height();
const PINCH_END: u32 = 130;

// ======================================================
// PLACEMENT
// ======================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Full page width.
    Full,
    /// Left half of a Small-panel pair.
    Left,
    /// Right half of a Small-panel pair, sharing the left panel's row.
    Right,
}

/// Where a block landed and how the cursor moved to put it there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    /// First row of the block (1-based sheet row).
    pub row:           u32,
    pub slot:          Slot,
    /// Blank rows inserted before the block.
    pub padding:       u32,
    /// Rows the cursor advanced past the block when placing it.
    pub advance:       u32,
    /// Rows the block occupies.
    pub height:        u32,
    /// Page height in effect when the block was placed.
    pub page_capacity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PackState {
    Idle,
    LeftSlotFilled { row: u32, height: u32 },
}

// ======================================================
// LAYOUT CURSOR
// ======================================================

/// Vertical allocator for the report sheet. Created once per report and
/// only ever moves forward.
#[derive(Debug, Clone)]
pub struct LayoutCursor {
    start_row:     u32,
    current_row:   u32,
    overflow:      bool,
    state:         PackState,
    padded_rows:   u32,
    advanced_rows: u32,
}

impl Default for LayoutCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl LayoutCursor {
    pub fn new() -> Self {
        Self::starting_at(START_ROW)
    }

    pub fn starting_at(row: u32) -> Self {
        LayoutCursor {
            start_row:     row,
            current_row:   row,
            overflow:      false,
            state:         PackState::Idle,
            padded_rows:   0,
            advanced_rows: 0,
        }
    }

    pub fn current_row(&self) -> u32 {
        self.current_row
    }

    pub fn start_row(&self) -> u32 {
        self.start_row
    }

    #[cfg(test)]
    pub fn is_overflowed(&self) -> bool {
        self.overflow
    }

    pub fn page_capacity(&self) -> u32 {
        if self.overflow {
            OVERFLOW_PAGE_CAPACITY
        } else {
            PAGE_CAPACITY
        }
    }

    /// Total blank rows inserted so far.
    pub fn padded_rows(&self) -> u32 {
        self.padded_rows
    }

    /// Total rows advanced past placed blocks so far.
    pub fn advanced_rows(&self) -> u32 {
        self.advanced_rows
    }

    /// Whether a left Small panel is waiting for its right partner.
    #[cfg(test)]
    pub fn has_open_pair(&self) -> bool {
        matches!(self.state, PackState::LeftSlotFilled { .. })
    }

    /// Allocate a full-width block of `height` rows and return its first row.
    /// With `avoid_break`, blank rows are inserted first so the block does
    /// not straddle a printed page.
    #[cfg(test)]
    pub fn reserve(&mut self, height: u32, avoid_break: bool) -> u32 {
        self.reserve_block(height, avoid_break).row
    }

    /// Same as `reserve`, returning the full placement.
    pub fn reserve_block(&mut self, height: u32, avoid_break: bool) -> Placement {
        self.close_pair();
        self.allocate(height, avoid_break)
    }

    /// Place a group's colored title row. There is always at least one blank
    /// row between the previous content and the header.
    pub fn section_header(&mut self) -> Placement {
        self.close_pair();
        self.refresh_overflow();

        let mut padding = self.padding_for(self.current_row, HEADER_CHECK_HEIGHT);
        if padding == 0 {
            padding = 1 + self.break_padding(self.current_row + 1, HEADER_CHECK_HEIGHT);
        }
        self.pad(padding);

        let row = self.current_row;
        self.advance(1);

        Placement {
            row,
            slot: Slot::Full,
            padding,
            advance: 1,
            height: 1,
            page_capacity: self.page_capacity(),
        }
    }

    /// Place one panel block: the chart rows of `size` plus `extra`
    /// annotation rows. Pairable Small panels alternate between the left and
    /// the right slot of the same row.
    pub fn place_panel(&mut self, size: SizeClass, extra: u32, pairable: bool) -> Placement {
        let height = size.height() + extra;

        if size != SizeClass::Small || !pairable {
            return self.reserve_block(height, true);
        }

        match self.state {
            PackState::Idle => {
                self.refresh_overflow();
                let padding = self.padding_for(self.current_row, height.max(PAIR_CHECK_HEIGHT));
                self.pad(padding);

                let row = self.current_row;
                self.state = PackState::LeftSlotFilled { row, height };

                Placement {
                    row,
                    slot: Slot::Left,
                    padding,
                    advance: 0,
                    height,
                    page_capacity: self.page_capacity(),
                }
            }
            PackState::LeftSlotFilled { row, height: left } => {
                let shared = left.max(height);
                self.state = PackState::Idle;
                self.advance(shared);

                Placement {
                    row,
                    slot: Slot::Right,
                    padding: 0,
                    advance: shared,
                    height,
                    page_capacity: self.page_capacity(),
                }
            }
        }
    }

    /// Close a dangling left Small panel. Returns the rows advanced.
    pub fn finish(&mut self) -> u32 {
        self.close_pair()
    }

    // ──────────────────────────────────────────────────────
    // internals
    // ──────────────────────────────────────────────────────

    fn allocate(&mut self, height: u32, avoid_break: bool) -> Placement {
        self.refresh_overflow();

        let padding = if avoid_break {
            self.padding_for(self.current_row, height)
        } else {
            0
        };
        self.pad(padding);

        let row = self.current_row;
        self.advance(height);

        Placement {
            row,
            slot: Slot::Full,
            padding,
            advance: height,
            height,
            page_capacity: self.page_capacity(),
        }
    }

    fn close_pair(&mut self) -> u32 {
        match self.state {
            PackState::LeftSlotFilled { height, .. } => {
                self.state = PackState::Idle;
                self.advance(height);
                height
            }
            PackState::Idle => 0,
        }
    }

    fn refresh_overflow(&mut self) {
        if self.current_row > PAGE_CAPACITY {
            self.overflow = true;
        }
    }

    fn pad(&mut self, rows: u32) {
        self.current_row += rows;
        self.padded_rows += rows;
    }

    fn advance(&mut self, rows: u32) {
        self.current_row += rows;
        self.advanced_rows += rows;
    }

    /// Break padding at `row`, or the single pinch row when no break is due.
    fn padding_for(&self, row: u32, height: u32) -> u32 {
        let pad = self.break_padding(row, height);
        if pad > 0 {
            return pad;
        }
        if row > PINCH_START && row < PINCH_END {
            return 1 + self.break_padding(row + 1, height);
        }
        0
    }

    /// Rows needed to move a block of `height` starting at `row` onto the
    /// first row of the next page, or 0 if it fits where it is.
    fn break_padding(&self, row: u32, height: u32) -> u32 {
        let capacity = self.page_capacity();
        let position = (row - 1) % capacity + 1;

        if height >= capacity {
            // cannot fit on any page; at least start on a fresh one
            return if position == 1 { 0 } else { capacity - position + 1 };
        }

        if position > capacity - height {
            capacity - position + 1
        } else {
            0
        }
    }
}

// ======================================================
// TESTS
// ======================================================
