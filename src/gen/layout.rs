use crate::{Color, Command, Coord, Direction, PietCode};
use indoc::indoc;
use itertools::iproduct;
use log::{debug, trace};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::fmt;

/// Commands safe to paint as filler on the way to the abort program: they
/// neither redirect the instruction pointer, touch I/O, reorder the stack,
/// nor repeat the previous color (NONE would fuse adjacent codels).
const SAFE_COMMANDS: [Command; 10] = [
    Command::Push,
    Command::Pop,
    Command::Add,
    Command::Subtract,
    Command::Multiply,
    Command::Divide,
    Command::Mod,
    Command::Not,
    Command::Greater,
    Command::Duplicate,
];

/// Halting block for odd-sided grids. `a` codels take the abort color, `#`
/// codels are black; any instruction pointer that enters the `a` block finds
/// every exit walled off.
const ABORT_ODD: &str = indoc! {"
    ..#..
    .#a#.
    ..aa#
    .#a#.
    ..#..
"};

/// Halting block for even-sided grids.
const ABORT_EVEN: &str = indoc! {"
    ..##..
    .#aa#.
    ..aaa#
    ..aaa#
    .#aa#.
    ..##..
"};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum AbortCell {
    Edge,
    Abort,
}

struct AbortPattern {
    width: usize,
    height: usize,
    cells: Vec<Option<AbortCell>>,
}

impl AbortPattern {
    fn parse(pattern: &str) -> Self {
        let mut width = 0;
        let mut height = 0;
        let mut cells = Vec::new();
        for line in pattern.lines() {
            width = line.len();
            height += 1;
            for c in line.bytes() {
                cells.push(match c {
                    b'.' => None,
                    b'#' => Some(AbortCell::Edge),
                    b'a' => Some(AbortCell::Abort),
                    _ => { panic!(); }
                });
            }
        }
        AbortPattern { width, height, cells }
    }

    fn odd() -> Self {
        Self::parse(ABORT_ODD)
    }

    fn for_side(side: usize) -> Self {
        if side % 2 == 0 { Self::parse(ABORT_EVEN) } else { Self::odd() }
    }

    fn at(&self, x: usize, y: usize) -> Option<AbortCell> {
        self.cells[x + y * self.width]
    }
}

#[derive(Debug)]
pub(super) enum LayoutError {
    GridTooSmall { w: usize, h: usize, x: usize, y: usize },
    Unfilled { x: usize, y: usize },
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::GridTooSmall { w, h, x, y } => {
                write!(f, "grid is too small. w={w} h={h} pos=({x}, {y})")
            }
            LayoutError::Unfilled { x, y } => {
                write!(f, "cell ({x}, {y}) was left unpainted")
            }
        }
    }
}

/// The layout grid: every cell either painted or still empty. The abort
/// program is painted at construction.
struct Grid {
    width: usize,
    height: usize,
    cells: Vec<Option<Color>>,
}

impl Grid {
    fn new(width: usize, height: usize, abort_color: Color) -> Self {
        let mut grid = Grid {
            width,
            height,
            cells: vec![None; width * height],
        };
        let pattern = AbortPattern::for_side(width);
        let offset_x = width / 2 - pattern.width / 2;
        let offset_y = height / 2 - pattern.height / 2;
        for (y, x) in iproduct!(0..pattern.height, 0..pattern.width) {
            match pattern.at(x, y) {
                Some(AbortCell::Edge) => { grid.set(offset_x + x, offset_y + y, Color::Black); }
                Some(AbortCell::Abort) => { grid.set(offset_x + x, offset_y + y, abort_color); }
                None => {}
            }
        }
        grid
    }

    fn get(&self, x: usize, y: usize) -> Option<Color> {
        if x >= self.width || y >= self.height { return None; }
        self.cells[x + y * self.width]
    }

    fn set(&mut self, x: usize, y: usize, color: Color) {
        self.cells[x + y * self.width] = Some(color);
    }

    /// Painting `color` at (x, y) is a conflict when a four-neighbor already
    /// holds the same color. White and black codels never conflict.
    fn conflicts(&self, color: Color, x: usize, y: usize) -> bool {
        if color == Color::White || color == Color::Black {
            return false;
        }
        [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ]
        .into_iter()
        .any(|(nx, ny)| self.get(nx, ny) == Some(color))
    }

    /// The abort program's footprint plus the approach corridor one column
    /// to its left. The spiral must not paint commands in here.
    fn in_abort_area(&self, x: usize, y: usize) -> bool {
        let pattern = AbortPattern::for_side(self.width);
        let min_x = self.width / 2 - pattern.width / 2 - 1;
        let min_y = self.height / 2 - pattern.height / 2;
        let max_x = min_x + 1 + pattern.width;
        let max_y = min_y + pattern.height;
        (min_x..max_x).contains(&x) && (min_y..max_y).contains(&y)
    }

    fn into_code(self) -> Result<PietCode, LayoutError> {
        let Grid { width, height, cells } = self;
        let code: Option<Vec<Color>> = cells.iter().copied().collect();
        match code {
            Some(code) => Ok(PietCode { width, height, code }),
            None => {
                let hole = cells.iter().position(|c| c.is_none()).unwrap();
                Err(LayoutError::Unfilled { x: hole % width, y: hole / width })
            }
        }
    }
}

/// Painting position: coordinates, travel direction, and the color of the
/// most recently painted codel (the base for the next color step).
#[derive(Clone, Copy, Debug)]
struct Cursor {
    x: usize,
    y: usize,
    dp: Direction,
    color: Color,
}

impl Cursor {
    fn advance(&mut self) {
        let (dx, dy) = self.dp.to_delta();
        self.x = self.x.wrapping_add(dx);
        self.y = self.y.wrapping_add(dy);
    }

    fn retreat(&mut self, num: usize) {
        let (dx, dy) = self.dp.to_delta();
        for _ in 0..num {
            self.x = self.x.wrapping_sub(dx);
            self.y = self.y.wrapping_sub(dy);
        }
    }

    fn ahead(&self, num: usize) -> Coord {
        let (dx, dy) = self.dp.to_delta();
        let mut x = self.x;
        let mut y = self.y;
        for _ in 0..num {
            x = x.wrapping_add(dx);
            y = y.wrapping_add(dy);
        }
        (x, y)
    }
}

/// Conflict-resolution state for the current line: where the last white
/// bridge went, which recolors were already tried there, and the recolor to
/// fall back on when the bridge runs dry. Reset at the start of every line.
struct Bridge {
    cell: Option<Coord>,
    exclude_colors: Vec<Color>,
    last_color: Color,
}

impl Bridge {
    fn new() -> Self {
        Bridge {
            cell: None,
            exclude_colors: Vec::new(),
            last_color: Color::Black,
        }
    }
}

/// One layout attempt at a fixed grid size. A `GridTooSmall` failure throws
/// the whole attempt away; `do_layout` then retries one size up.
struct Attempt<'a> {
    rng: &'a mut StdRng,
    grid: Grid,
    cur: Cursor,
    commands: Vec<Command>,
    index: usize,
    abort_color: Color,
}

pub(super) fn do_layout(
    commands: &[Command],
    start_color: Color,
    abort_color: Color,
    rng: &mut StdRng,
) -> Result<PietCode, LayoutError> {
    let (mut w, mut h) = predict_grid_size(commands.len());
    loop {
        // Piet fixes the start of execution: origin, DP right.
        let mut attempt = Attempt {
            rng: &mut *rng,
            grid: Grid::new(w, h, abort_color),
            cur: Cursor { x: 0, y: 0, dp: Direction::Right, color: start_color },
            commands: commands.to_vec(),
            index: 0,
            abort_color,
        };
        match attempt.run() {
            Ok(()) => {
                debug!(
                    "layout done: pos=({}, {}) dp={:?} color={:?}",
                    attempt.cur.x, attempt.cur.y, attempt.cur.dp, attempt.cur.color,
                );
                return attempt.grid.into_code();
            }
            Err(e) => {
                debug!("{e}; retrying at {}x{}", w + 1, h + 1);
                w += 1;
                h += 1;
            }
        }
    }
}

/// Guess a grid side from the command count: the commands themselves, a
/// PUSH+POINTER pair per corner (four per lap of the spiral), and the abort
/// program's footprint.
fn predict_grid_size(command_num: usize) -> (usize, usize) {
    let pattern = AbortPattern::odd();
    let rotate_num = (command_num as f64).sqrt().ceil() as usize * 4;
    let predicted = command_num + rotate_num + pattern.width * pattern.height;
    let mut side = (predicted as f64).sqrt().ceil() as usize;
    // Never smaller than one full lap around the abort program.
    side = side.max(pattern.width + 2).max(pattern.height + 2);
    debug!("predict_grid_size: commands={command_num} predicted={predicted} side={side}");
    (side, side)
}

impl Attempt<'_> {
    fn run(&mut self) -> Result<(), LayoutError> {
        self.put_codels()?;
        self.put_to_abort_area()?;
        self.put_to_abort_program()?;
        self.fill_empty()
    }

    fn too_small(&self) -> LayoutError {
        LayoutError::GridTooSmall {
            w: self.grid.width,
            h: self.grid.height,
            x: self.cur.x,
            y: self.cur.y,
        }
    }

    fn random_color(&mut self, exclude: &[Color]) -> Option<Color> {
        let choices: Vec<Color> = Color::CHROMATIC
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect();
        choices.choose(self.rng).copied()
    }

    fn random_safe_command(&mut self, exclude: &[Command]) -> Option<Command> {
        let choices: Vec<Command> = SAFE_COMMANDS
            .into_iter()
            .filter(|c| !exclude.contains(c))
            .collect();
        choices.choose(self.rng).copied()
    }

    /// Spiral the message commands inward until all are placed. Reaching
    /// the abort area with commands still in hand means the grid can't fit
    /// them.
    fn put_codels(&mut self) -> Result<(), LayoutError> {
        while self.index < self.commands.len() {
            if self.grid.in_abort_area(self.cur.x, self.cur.y) {
                return Err(self.too_small());
            }
            self.put_line();
        }
        debug!(
            "put_codels: exit. pos=({}, {}) dp={:?} color={:?}",
            self.cur.x, self.cur.y, self.cur.dp, self.cur.color,
        );
        Ok(())
    }

    /// Keep spiraling with random filler commands until the cursor enters
    /// the approach corridor. Conflict resolution may have pushed message
    /// commands back out for re-placement; arriving with any of those still
    /// pending means they never found a home.
    fn put_to_abort_area(&mut self) -> Result<(), LayoutError> {
        let original_len = self.commands.len();
        loop {
            if self.grid.in_abort_area(self.cur.x, self.cur.y) {
                if self.index < original_len {
                    return Err(self.too_small());
                }
                break;
            }
            if self.index >= self.commands.len() {
                let need = self.index - self.commands.len() + 1;
                for _ in 0..need {
                    let command = self.random_safe_command(&[]).unwrap();
                    self.commands.push(command);
                }
            }
            self.put_line();
        }
        debug!(
            "put_to_abort_area: exit. pos=({}, {}) dp={:?} color={:?}",
            self.cur.x, self.cur.y, self.cur.dp, self.cur.color,
        );
        Ok(())
    }

    /// Aim the instruction pointer into the abort block: three codels
    /// straight (the last two being PUSH and POINTER, turning clockwise),
    /// then two more straight into the block's entry column.
    fn put_to_abort_program(&mut self) -> Result<(), LayoutError> {
        let mut exclude = Vec::new();
        loop {
            let Some(command) = self.random_safe_command(&exclude) else {
                return Err(self.too_small());
            };
            let random_color = self.cur.color.next_for_command(command);
            let push_color = random_color.next_for_command(Command::Push);
            let pointer_color = push_color.next_for_command(Command::Pointer);
            let (x1, y1) = self.cur.ahead(1);
            let (x2, y2) = self.cur.ahead(2);
            if self.grid.conflicts(random_color, self.cur.x, self.cur.y)
                || self.grid.conflicts(push_color, x1, y1)
                || self.grid.conflicts(pointer_color, x2, y2)
            {
                exclude.push(command);
                continue;
            }
            for (command, color) in [
                (command, random_color),
                (Command::Push, push_color),
                (Command::Pointer, pointer_color),
            ] {
                self.put(command, color);
            }
            break;
        }

        let mut exclude1 = Vec::new();
        let mut exclude2 = Vec::new();
        loop {
            let Some(command1) = self.random_safe_command(&exclude1) else {
                return Err(self.too_small());
            };
            let color1 = self.cur.color.next_for_command(command1);
            if self.grid.conflicts(color1, self.cur.x, self.cur.y) {
                exclude1.push(command1);
                continue;
            }
            let Some(command2) = self.random_safe_command(&exclude2) else {
                return Err(self.too_small());
            };
            let color2 = color1.next_for_command(command2);
            let (x1, y1) = self.cur.ahead(1);
            if self.grid.conflicts(color2, x1, y1) {
                exclude2.push(command2);
                continue;
            }
            // The step off this codel into the abort block is a real color
            // transition; it must not read or write anything.
            if matches!(
                color2.step_to(self.abort_color),
                Command::InNum | Command::InChar | Command::OutNum | Command::OutChar,
            ) {
                exclude2.push(command2);
                continue;
            }
            for (command, color) in [(command1, color1), (command2, color2)] {
                self.put(command, color);
            }
            break;
        }
        debug!(
            "put_to_abort_program: exit. pos=({}, {}) dp={:?} color={:?}",
            self.cur.x, self.cur.y, self.cur.dp, self.cur.color,
        );
        Ok(())
    }

    /// Paint one codel at the cursor and move on, rotating at a POINTER.
    fn put(&mut self, command: Command, color: Color) {
        self.grid.set(self.cur.x, self.cur.y, color);
        trace!(
            "put: pos=({}, {}) command={command:?} color={color:?}",
            self.cur.x, self.cur.y,
        );
        if command == Command::Pointer {
            self.cur.dp = self.cur.dp.rotate(1);
        }
        self.cur.color = color;
        self.cur.advance();
    }

    /// Paint one straight line of the spiral: commands up to the line's last
    /// two cells, then a PUSH+POINTER corner that turns the direction
    /// pointer clockwise. Color conflicts punch in a white bridge and a
    /// fresh random color, backing up past the corner cells when needed.
    fn put_line(&mut self) {
        let mut bridge = Bridge::new();
        let start_x = self.cur.x;
        let start_y = self.cur.y;
        let w = self.grid.width;
        let h = self.grid.height;

        // Length of the current line: from the cursor to the wall or to the
        // codels of a previous lap, depending on direction.
        let length = match self.cur.dp {
            Direction::Right => w - self.cur.y - self.cur.x,
            Direction::Down => h - ((w - 1) - self.cur.x) - self.cur.y,
            Direction::Left => (self.cur.x + 1) - ((h - 1) - self.cur.y),
            Direction::Up => self.cur.y - (self.cur.x + 1) + 1,
        };

        loop {
            let dist = self.cur.x.abs_diff(start_x) + self.cur.y.abs_diff(start_y);
            if dist + 2 == length {
                let push_color = self.cur.color.next_for_command(Command::Push);
                let pointer_color = push_color.next_for_command(Command::Pointer);
                let (nx, ny) = self.cur.ahead(1);
                if self.grid.conflicts(push_color, self.cur.x, self.cur.y)
                    || self.grid.conflicts(pointer_color, nx, ny)
                {
                    // No room to resolve on the corner cells themselves.
                    self.resolve_conflict(&mut bridge, 2);
                    continue;
                }
                self.put(Command::Push, push_color);
                self.put(Command::Pointer, pointer_color);
                break;
            }

            if self.index >= self.commands.len() {
                break;
            }

            let command = self.commands[self.index];
            let command_color = self.cur.color.next_for_command(command);
            if self.grid.conflicts(command_color, self.cur.x, self.cur.y) {
                // Resolving in place one cell before the corner would leave
                // nowhere for the POINTER; back off one extra cell there.
                let relocate = if dist + 3 == length { 1 } else { 0 };
                self.resolve_conflict(&mut bridge, relocate);
                continue;
            }

            self.grid.set(self.cur.x, self.cur.y, command_color);
            trace!(
                "put_line: pos=({}, {}) index={} command={command:?} color={command_color:?}",
                self.cur.x, self.cur.y, self.index,
            );
            self.index += 1;
            self.cur.color = command_color;
            self.cur.advance();
        }
    }

    /// Break color continuity with a white codel followed by one random
    /// recolor codel, backing the cursor (and the command index) up by
    /// `relocate` cells first. A later conflict on the same line reuses the
    /// existing bridge, re-painting its recolor cell instead of adding
    /// another bridge.
    fn resolve_conflict(&mut self, bridge: &mut Bridge, relocate: usize) {
        debug!(
            "resolve_conflict: pos=({}, {}) index={} relocate={relocate} bridge={:?}",
            self.cur.x, self.cur.y, self.index, bridge.cell,
        );
        match bridge.cell {
            None => {
                self.index -= relocate;
                self.cur.retreat(relocate);
                self.grid.set(self.cur.x, self.cur.y, Color::White);
                bridge.cell = Some((self.cur.x, self.cur.y));
                trace!(
                    "resolve_conflict: pos=({}, {}) command=FreeZone color=White",
                    self.cur.x, self.cur.y,
                );
                self.cur.advance();
            }
            Some((bx, by)) => {
                // Roll back to just past the bridge; the +2 accounts for the
                // bridge and recolor cells, which carry no command.
                let dist = self.cur.x.abs_diff(bx).max(self.cur.y.abs_diff(by));
                self.index = self.index + 2 - dist;
                self.cur.x = bx;
                self.cur.y = by;
                self.cur.advance();
            }
        }

        let resolve_color = loop {
            let Some(color) = self.random_color(&bridge.exclude_colors) else {
                // Every color was tried at this bridge; keep the last one
                // that worked and start a fresh bridge at the next conflict.
                let color = bridge.last_color;
                bridge.cell = None;
                bridge.exclude_colors.clear();
                break color;
            };
            if self.grid.conflicts(color, self.cur.x, self.cur.y) {
                bridge.exclude_colors.push(color);
                continue;
            }
            bridge.last_color = color;
            bridge.exclude_colors.push(color);
            break color;
        };

        self.grid.set(self.cur.x, self.cur.y, resolve_color);
        trace!(
            "resolve_conflict: pos=({}, {}) command=Noop color={resolve_color:?}",
            self.cur.x, self.cur.y,
        );
        self.cur.advance();
        self.cur.color = resolve_color;
        debug!(
            "resolve_conflict: resolved. pos=({}, {}) index={} color={resolve_color:?}",
            self.cur.x, self.cur.y, self.index,
        );
    }

    /// Paint every still-empty cell with a random non-conflicting color.
    fn fill_empty(&mut self) -> Result<(), LayoutError> {
        let w = self.grid.width;
        let h = self.grid.height;
        for (y, x) in iproduct!(0..h, 0..w) {
            if self.grid.get(x, y).is_some() {
                continue;
            }
            let mut exclude = Vec::new();
            loop {
                let Some(color) = self.random_color(&exclude) else {
                    return Err(LayoutError::GridTooSmall { w, h, x, y });
                };
                if self.grid.conflicts(color, x, y) {
                    exclude.push(color);
                    continue;
                }
                self.grid.set(x, y, color);
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen::synth;
    use rand::SeedableRng;

    #[test]
    fn test_predict_grid_size() {
        // (command count, expected side): the minimum, then " ", "A",
        // "Xmas", "Hello World!", "Merry Christmas!!".
        for (command_num, expect) in [(4, 7), (13, 8), (23, 9), (93, 13), (233, 18), (371, 22)] {
            assert_eq!(predict_grid_size(command_num), (expect, expect), "n={command_num}");
        }
    }

    #[test]
    fn test_abort_patterns_parse() {
        let odd = AbortPattern::odd();
        assert_eq!((odd.width, odd.height), (5, 5));
        assert_eq!(odd.cells.iter().filter(|c| **c == Some(AbortCell::Edge)).count(), 7);
        assert_eq!(odd.cells.iter().filter(|c| **c == Some(AbortCell::Abort)).count(), 4);

        let even = AbortPattern::parse(ABORT_EVEN);
        assert_eq!((even.width, even.height), (6, 6));
        assert_eq!(even.cells.iter().filter(|c| **c == Some(AbortCell::Edge)).count(), 8);
        assert_eq!(even.cells.iter().filter(|c| **c == Some(AbortCell::Abort)).count(), 10);
    }

    #[test]
    fn test_pattern_for_side_parity() {
        assert_eq!(AbortPattern::for_side(7).width, 5);
        assert_eq!(AbortPattern::for_side(8).width, 6);
    }

    #[test]
    fn test_grid_places_abort_program() {
        let grid = Grid::new(7, 7, Color::LightGreen);
        // Pattern offset is (1, 1) on a 7x7 grid.
        assert_eq!(grid.get(3, 2), Some(Color::LightGreen));
        assert_eq!(grid.get(3, 3), Some(Color::LightGreen));
        assert_eq!(grid.get(4, 3), Some(Color::LightGreen));
        assert_eq!(grid.get(3, 4), Some(Color::LightGreen));
        for (x, y) in [(3, 1), (2, 2), (4, 2), (5, 3), (2, 4), (4, 4), (3, 5)] {
            assert_eq!(grid.get(x, y), Some(Color::Black), "edge at ({x}, {y})");
        }
        // The origin and the approach corridor stay empty.
        assert_eq!(grid.get(0, 0), None);
        assert_eq!(grid.get(0, 3), None);
    }

    #[test]
    fn test_in_abort_area() {
        let grid = Grid::new(7, 7, Color::LightGreen);
        assert!(!grid.in_abort_area(0, 0));
        assert!(!grid.in_abort_area(6, 0));
        assert!(grid.in_abort_area(0, 1));
        assert!(grid.in_abort_area(3, 3));
        assert!(grid.in_abort_area(5, 5));
        assert!(!grid.in_abort_area(6, 3));
        assert!(!grid.in_abort_area(3, 6));
    }

    #[test]
    fn test_conflicts() {
        let mut grid = Grid::new(9, 9, Color::LightGreen);
        grid.set(0, 0, Color::Red);
        assert!(grid.conflicts(Color::Red, 1, 0));
        assert!(grid.conflicts(Color::Red, 0, 1));
        assert!(!grid.conflicts(Color::Blue, 1, 0));
        // diagonal is not adjacency
        assert!(!grid.conflicts(Color::Red, 1, 1));
        // white and black never conflict
        assert!(!grid.conflicts(Color::White, 1, 0));
        assert!(!grid.conflicts(Color::Black, 1, 0));
    }

    fn layout(message: &str, start: Color, abort: Color, seed: u64) -> PietCode {
        let commands = synth::synthesize(message).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let code = do_layout(&commands, start, abort, &mut rng).unwrap();
        inspect_layout(&code, &commands, message, start);
        code
    }

    fn take_pair(stack: &mut Vec<i64>) -> Option<(i64, i64)> {
        if stack.len() < 2 {
            return None;
        }
        let b = stack.pop().unwrap();
        let a = stack.pop().unwrap();
        Some((a, b))
    }

    /// Walk the grid from the origin the way the instruction pointer will,
    /// simulating the stack (underflow and division by zero are ignored, as
    /// Piet prescribes), and stop at the abort block. The message commands,
    /// leading NONE included, must come back as an exact prefix once corner
    /// PUSH/POINTER pairs and white bridges are cancelled out, and the
    /// OUT_CHAR transitions must print exactly the message.
    fn inspect_layout(code: &PietCode, expect: &[Command], message: &str, start: Color) {
        use Command::*;

        let mut stack: Vec<i64> = Vec::new();
        let mut printed: Vec<i64> = Vec::new();
        let mut actual: Vec<Command> = Vec::new();
        let mut x = 0usize;
        let mut y = 0usize;
        let mut dp = Direction::Right;
        let mut color = start;
        let abort_x = (code.width() - 1) / 2;
        let abort_y = code.height() / 2;

        loop {
            let next = code.at(x, y).unwrap();
            let command = color.step_to(next);
            if (x, y) == (abort_x, abort_y) {
                assert!(!matches!(command, InNum | InChar | OutNum | OutChar));
                break;
            }

            let chromatic = !matches!(next, Color::White | Color::Black);
            match command {
                Noop => { assert!((x == 0 && y == 0) || color == Color::White); }
                Push => { assert!(chromatic); stack.push(1); }
                Pop => { assert!(chromatic); stack.pop(); }
                Add | Subtract | Multiply | Divide | Mod | Greater => {
                    assert!(chromatic);
                    if let Some((a, b)) = take_pair(&mut stack) {
                        match command {
                            Add => { stack.push(a + b); }
                            Subtract => { stack.push(a - b); }
                            Multiply => { stack.push(a * b); }
                            Divide => { if b != 0 { stack.push(a.div_euclid(b)); } }
                            Mod => { if b != 0 { stack.push(a.rem_euclid(b)); } }
                            Greater => { stack.push((a > b) as i64); }
                            _ => { unreachable!(); }
                        }
                    }
                }
                Not => {
                    assert!(chromatic);
                    if let Some(v) = stack.pop() {
                        stack.push((v == 0) as i64);
                    }
                }
                Pointer => {
                    assert!(chromatic);
                    if let Some(v) = stack.pop() {
                        dp = dp.rotate(v as i32);
                    }
                }
                Duplicate => {
                    assert!(chromatic);
                    if let Some(&top) = stack.last() {
                        stack.push(top);
                    }
                }
                OutChar => {
                    assert!(chromatic);
                    printed.push(stack.pop().unwrap());
                }
                FreeZone => { assert_eq!(next, Color::White); }
                Switch | Roll | InNum | InChar | OutNum | Edge => {
                    panic!("unexpected {command:?} at ({x}, {y})");
                }
            }

            match command {
                Noop if x == 0 && y == 0 => { actual.push(command); }
                // A NONE away from the origin must be the exit of a bridge.
                Noop => { assert_eq!(actual.pop(), Some(FreeZone)); }
                // A POINTER must consume the PUSH placed just for it.
                Pointer => { assert_eq!(actual.pop(), Some(Push)); }
                command => { actual.push(command); }
            }

            color = next;
            let (dx, dy) = dp.to_delta();
            x = x.wrapping_add(dx);
            y = y.wrapping_add(dy);
        }

        assert_eq!(&actual[..expect.len()], expect);
        let want: Vec<i64> = message.chars().map(|c| c as i64).collect();
        assert_eq!(printed, want);
    }

    /// The invariants every layout must satisfy: origin color, intact abort
    /// program, all cells painted, and no same-color chromatic adjacency
    /// anywhere outside the abort block.
    fn check_layout(code: &PietCode, start: Color, abort: Color) {
        assert_eq!(code.at(0, 0), Some(start));

        let initial = Grid::new(code.width(), code.height(), abort);
        for (x, y, color) in code.codels() {
            match initial.get(x, y) {
                Some(expect) => { assert_eq!(color, expect, "abort cell ({x}, {y})"); }
                None => {
                    assert_ne!(color, Color::Black, "stray black at ({x}, {y})");
                    if color == Color::White {
                        continue;
                    }
                    for (nx, ny) in [(x.wrapping_sub(1), y), (x + 1, y), (x, y.wrapping_sub(1)), (x, y + 1)] {
                        assert_ne!(
                            code.at(nx, ny),
                            Some(color),
                            "same-color neighbors at ({x}, {y}) / ({nx}, {ny})",
                        );
                    }
                }
            }
        }
    }

    #[test]
    fn test_do_layout_small_messages() {
        for (seed, message, start, abort) in [
            (21u64, "A", Color::LightRed, Color::DarkMagenta),
            (22, "Hello World!", Color::Cyan, Color::Green),
            (23, "Merry Christmas!!", Color::DarkMagenta, Color::LightRed),
        ] {
            let code = layout(message, start, abort, seed);
            check_layout(&code, start, abort);
        }
    }

    #[test]
    fn test_do_layout_empty_message() {
        let code = layout("", Color::LightRed, Color::LightGreen, 31);
        assert_eq!((code.width(), code.height()), (7, 7));
        check_layout(&code, Color::LightRed, Color::LightGreen);
    }

    /// A long message overflows the predicted grid and leans hard on the
    /// conflict resolver; the invariants must still hold.
    #[test]
    fn test_do_layout_long_message() {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(41);
        let message: String = (0..1000)
            .map(|_| char::from(rng.gen_range(1..=0xFFu8)))
            .collect();
        let code = layout(&message, Color::LightRed, Color::DarkMagenta, 42);
        check_layout(&code, Color::LightRed, Color::DarkMagenta);
    }
}
