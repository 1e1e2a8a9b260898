//! Level text format
//!
//! ```text
//! [boss <name>]
//! <width> <height>
//! <grid tokens, top row first>
//! STARS: <five milestones>
//! <item|keyword> <weight> ...
//! [PADDLESTARTXPOS: <x>]
//! ```

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::path::Path;
use std::str::SplitWhitespace;

use rand::seq::IndexedRandom;

use super::context::SimContext;
use super::items::{ItemDropTable, ItemKind};
use super::level::{GameLevel, StarMilestones};
use super::piece::*;
use super::turret::{TurretAi, TurretKind};

/// Largest width or height accepted
pub const MAX_LEVEL_DIMENSION: usize = 500;

const STARS_KEYWORD: &str = "STARS:";
const PADDLE_START_KEYWORD: &str = "PADDLESTARTXPOS:";
const BOSS_KEYWORD: &str = "boss";

/// Failure loading a level file
#[derive(Debug)]
pub enum LevelLoadError {
    Io(std::io::Error),
    MissingDimensions,
    InvalidDimensions { width: String, height: String },
    UnexpectedEof { expected: &'static str },
    InvalidPieceToken { row: usize, col: usize, token: String },
    MalformedPiece { row: usize, col: usize, token: String, reason: &'static str },
    UnmatchedPortal { name: String },
    UnknownTeslaSibling { name: String, sibling: String },
    MissingStars { found: Option<String> },
    InvalidStars { token: String },
    UnknownItem { name: String },
    InvalidNumber { token: String },
}

impl std::fmt::Display for LevelLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LevelLoadError::Io(e) => write!(f, "level io error: {}", e),
            LevelLoadError::MissingDimensions => write!(f, "level is missing its width and height"),
            LevelLoadError::InvalidDimensions { width, height } => {
                write!(f, "invalid level dimensions {} x {}", width, height)
            }
            LevelLoadError::UnexpectedEof { expected } => write!(f, "level ended early, expected {}", expected),
            LevelLoadError::InvalidPieceToken { row, col, token } => {
                write!(f, "unknown piece '{}' at row {}, column {}", token, row, col)
            }
            LevelLoadError::MalformedPiece { row, col, token, reason } => {
                write!(f, "malformed piece '{}' at row {}, column {}: {}", token, row, col, reason)
            }
            LevelLoadError::UnmatchedPortal { name } => write!(f, "portal '{}' has no matching sibling", name),
            LevelLoadError::UnknownTeslaSibling { name, sibling } => {
                write!(f, "tesla block '{}' names unknown sibling '{}'", name, sibling)
            }
            LevelLoadError::MissingStars { found: Some(token) } => {
                write!(f, "expected {} after the grid, found '{}'", STARS_KEYWORD, token)
            }
            LevelLoadError::MissingStars { found: None } => write!(f, "level has no {} section", STARS_KEYWORD),
            LevelLoadError::InvalidStars { token } => write!(f, "invalid star milestone '{}'", token),
            LevelLoadError::UnknownItem { name } => write!(f, "unknown item '{}'", name),
            LevelLoadError::InvalidNumber { token } => write!(f, "invalid number '{}'", token),
        }
    }
}

impl std::error::Error for LevelLoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LevelLoadError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for LevelLoadError {
    fn from(e: std::io::Error) -> Self {
        LevelLoadError::Io(e)
    }
}

/// Cross-piece reference resolved once the whole grid is read
enum Link {
    Portal { name: String, sibling: String },
    Tesla { name: String, siblings: Vec<String> },
}

struct ParsedPiece {
    kind: PieceKind,
    trigger_id: Option<i32>,
    link: Option<Link>,
}

/// Position of a grid token, for error reporting
#[derive(Clone, Copy)]
struct Cell<'a> {
    row: usize,
    col: usize,
    token: &'a str,
}

impl Cell<'_> {
    fn malformed(&self, reason: &'static str) -> LevelLoadError {
        LevelLoadError::MalformedPiece {
            row: self.row,
            col: self.col,
            token: self.token.to_string(),
            reason,
        }
    }

    fn unknown(&self) -> LevelLoadError {
        LevelLoadError::InvalidPieceToken {
            row: self.row,
            col: self.col,
            token: self.token.to_string(),
        }
    }
}

/// Split `S{3}` / `X(a,b){3}` into the body and its trigger id
fn split_trigger<'a>(cell: &Cell<'a>) -> Result<(&'a str, Option<i32>), LevelLoadError> {
    let token = cell.token;
    let Some(open) = token.find('{') else {
        return Ok((token, None));
    };
    let Some(inner) = token[open + 1..].strip_suffix('}') else {
        return Err(cell.malformed("unterminated trigger id"));
    };
    let id = inner.parse::<i32>().map_err(|_| cell.malformed("trigger id is not an integer"))?;
    Ok((&token[..open], Some(id)))
}

/// Split `X(a,b)` into `"X"` and `["a", "b"]`; `None` args when there are no parentheses
fn split_args<'a>(cell: &Cell<'_>, body: &'a str) -> Result<(&'a str, Option<Vec<&'a str>>), LevelLoadError> {
    let Some(open) = body.find('(') else {
        return Ok((body, None));
    };
    let Some(inner) = body[open + 1..].strip_suffix(')') else {
        return Err(cell.malformed("unterminated argument list"));
    };
    let args = inner.split(',').map(str::trim).filter(|a| !a.is_empty()).collect();
    Ok((&body[..open], Some(args)))
}

fn parse_flag(cell: &Cell<'_>, arg: &str) -> Result<bool, LevelLoadError> {
    match arg.to_ascii_lowercase().as_str() {
        "1" | "t" | "true" => Ok(true),
        "0" | "f" | "false" => Ok(false),
        _ => Err(cell.malformed("expected a 0/1 flag")),
    }
}

/// Third portal argument: `f` marks a portal that flips the paddle
fn parse_portal_flip(cell: &Cell<'_>, arg: &str) -> Result<bool, LevelLoadError> {
    match arg.to_ascii_lowercase().as_str() {
        "f" | "flip" => Ok(true),
        _ => parse_flag(cell, arg),
    }
}

fn parse_items(cell: &Cell<'_>, args: &[&str]) -> Result<Vec<ItemKind>, LevelLoadError> {
    if args.is_empty() {
        return Err(cell.malformed("needs at least one item"));
    }
    let mut items = Vec::new();
    for arg in args {
        match ItemKind::from_str(arg).map(|item| vec![item]).or_else(|| ItemKind::keyword_set(arg)) {
            Some(found) => items.extend(found),
            None => return Err(LevelLoadError::UnknownItem { name: arg.to_string() }),
        }
    }
    Ok(items)
}

/// Cannon angles are written clockwise from 12 o'clock, `-1` for a free spin
fn parse_cannon_angle(cell: &Cell<'_>, arg: &str) -> Result<CannonAngle, LevelLoadError> {
    let degrees = |s: &str| s.trim().parse::<i32>().map_err(|_| cell.malformed("cannon angle is not an integer"));
    let from_x = |d: i32| crate::normalize_degrees(90.0 - d as f32);
    if arg.trim() == "-1" {
        return Ok(CannonAngle::Free);
    }
    match arg.split_once('-') {
        Some((a, b)) => {
            let (a, b) = (degrees(a)?, degrees(b)?);
            if a == b {
                Ok(CannonAngle::Fixed(from_x(a)))
            } else {
                // Clockwise a..b is counter-clockwise (90-b)..(90-a)
                let (lo, hi) = (90.0 - b as f32, 90.0 - a as f32);
                let hi = if hi < lo { hi + 360.0 } else { hi };
                Ok(CannonAngle::Range(lo, hi))
            }
        }
        None => Ok(CannonAngle::Fixed(from_x(degrees(arg)?))),
    }
}

fn single_arg<'a>(cell: &Cell<'_>, args: &Option<Vec<&'a str>>) -> Result<&'a str, LevelLoadError> {
    match args.as_deref() {
        Some([one]) => Ok(one),
        _ => Err(cell.malformed("expected exactly one argument")),
    }
}

fn parse_piece(cell: Cell<'_>, ctx: &mut SimContext) -> Result<ParsedPiece, LevelLoadError> {
    let (body, trigger_id) = split_trigger(&cell)?;
    let (code, args) = split_args(&cell, body)?;
    let mut link = None;

    let no_args = |kind: PieceKind| {
        if args.is_some() {
            Err(cell.malformed("piece takes no arguments"))
        } else {
            Ok(kind)
        }
    };

    let kind = match code {
        "E" => no_args(PieceKind::Empty)?,
        "S" => no_args(PieceKind::Solid)?,
        "G" | "Y" | "O" | "R" => {
            let stage = code.chars().next().and_then(BreakableStage::from_letter).ok_or_else(|| cell.unknown())?;
            no_args(PieceKind::Breakable(BreakableBlock::new(stage)))?
        }
        "B" => no_args(PieceKind::Bomb)?,
        "I" => no_args(PieceKind::Ink { life: INK_LIFE })?,
        "P" => no_args(PieceKind::Prism)?,
        "N" => no_args(PieceKind::NoEntry)?,
        "L" => no_args(PieceKind::Collateral { life: COLLATERAL_LIFE })?,
        "H" | "J" | "M" => {
            let turret = match code {
                "H" => TurretKind::Laser,
                "J" => TurretKind::Rocket,
                _ => TurretKind::Mine,
            };
            let scale = ctx.difficulty.turret_scale();
            let ai = TurretAi::new(turret, scale, ctx.rng());
            no_args(PieceKind::Turret(TurretBlock::new(ai)))?
        }
        "X" => {
            let (name, sibling, flips) = match args.as_deref() {
                Some([name, sibling]) => (*name, *sibling, false),
                Some([name, sibling, flag]) => (*name, *sibling, parse_portal_flip(&cell, flag)?),
                _ => return Err(cell.malformed("portal needs a name and a sibling")),
            };
            link = Some(Link::Portal {
                name: name.to_string(),
                sibling: sibling.to_string(),
            });
            PieceKind::Portal(PortalBlock {
                name: name.to_string(),
                sibling: None,
                colour_index: 0,
                flips_paddle: flips,
                last_ball_use: None,
            })
        }
        "C" | "C1" => {
            let angle = parse_cannon_angle(&cell, single_arg(&cell, &args)?)?;
            PieceKind::Cannon(CannonBlock::new(code == "C1", angle))
        }
        "A" => {
            let Some([on, changable, name, siblings @ ..]) = args.as_deref() else {
                return Err(cell.malformed("tesla needs on, changable and a name"));
            };
            link = Some(Link::Tesla {
                name: name.to_string(),
                siblings: siblings.iter().map(|s| s.to_string()).collect(),
            });
            PieceKind::Tesla(TeslaBlock {
                name: name.to_string(),
                active: parse_flag(&cell, on)?,
                changable: parse_flag(&cell, changable)?,
                connections: Vec::new(),
                toggle_life: TOGGLE_LIFE,
                last_toggle: None,
            })
        }
        "D" => {
            let allowed = parse_items(&cell, args.as_deref().unwrap_or_default())?;
            let next_item = allowed.choose(ctx.rng()).copied().ok_or_else(|| cell.malformed("no items"))?;
            PieceKind::ItemDrop(ItemDropBlock {
                allowed,
                next_item,
                damage: 0.0,
                last_drop: None,
            })
        }
        "W" => {
            let target = single_arg(&cell, &args)?
                .parse::<i32>()
                .map_err(|_| cell.malformed("switch target is not an integer"))?;
            PieceKind::Switch(SwitchBlock {
                target,
                toggle_life: TOGGLE_LIFE,
                last_press: None,
            })
        }
        "F" => {
            let dir = match single_arg(&cell, &args)?.to_ascii_lowercase().as_str() {
                "u" => OneWayDir::Up,
                "d" => OneWayDir::Down,
                "l" => OneWayDir::Left,
                "r" => OneWayDir::Right,
                _ => return Err(cell.malformed("one-way direction must be u, d, l or r")),
            };
            PieceKind::OneWay(dir)
        }
        "K" => PieceKind::AlwaysDrop {
            items: parse_items(&cell, args.as_deref().unwrap_or_default())?,
            life: ALWAYS_DROP_LIFE,
        },
        "Q" => match single_arg(&cell, &args)?.to_ascii_lowercase().as_str() {
            "f" => PieceKind::Regen {
                life: Some(REGEN_MAX_LIFE),
            },
            "i" => PieceKind::Regen { life: None },
            _ => return Err(cell.malformed("regen life must be f or i")),
        },
        "T" => {
            let Some([ty, corner]) = args.as_deref() else {
                return Err(cell.malformed("triangle needs a type and a corner"));
            };
            let orientation =
                TriangleOrientation::from_code(corner).ok_or_else(|| cell.malformed("corner must be ul, ur, ll or lr"))?;
            let behaviour = match *ty {
                "S" => TriangleBehaviour::Solid,
                "P" => TriangleBehaviour::Prism,
                _ => ty
                    .chars()
                    .next()
                    .filter(|_| ty.len() == 1)
                    .and_then(BreakableStage::from_letter)
                    .map(TriangleBehaviour::Breakable)
                    .ok_or_else(|| cell.malformed("triangle type must be S, P or a breakable colour"))?,
            };
            PieceKind::Triangle(TriangleBlock::new(behaviour, orientation))
        }
        _ => return Err(cell.unknown()),
    };

    Ok(ParsedPiece { kind, trigger_id, link })
}

fn next_token<'a>(tokens: &mut Peekable<SplitWhitespace<'a>>, expected: &'static str) -> Result<&'a str, LevelLoadError> {
    tokens.next().ok_or(LevelLoadError::UnexpectedEof { expected })
}

fn parse_number<T: std::str::FromStr>(token: &str) -> Result<T, LevelLoadError> {
    token.parse::<T>().map_err(|_| LevelLoadError::InvalidNumber {
        token: token.to_string(),
    })
}

/// Pair portals by name and wire up tesla connections
fn resolve_links(pieces: &mut [LevelPiece], links: Vec<(usize, Link)>) -> Result<(), LevelLoadError> {
    let mut portals: BTreeMap<String, (usize, String)> = BTreeMap::new();
    let mut teslas: BTreeMap<String, usize> = BTreeMap::new();
    for (slot, link) in &links {
        match link {
            Link::Portal { name, sibling } => {
                if portals.insert(name.clone(), (*slot, sibling.clone())).is_some() {
                    return Err(LevelLoadError::UnmatchedPortal { name: name.clone() });
                }
            }
            Link::Tesla { name, .. } => {
                teslas.insert(name.clone(), *slot);
            }
        }
    }

    let mut colours: BTreeMap<(String, String), usize> = BTreeMap::new();
    for (slot, link) in links {
        match link {
            Link::Portal { name, sibling } => {
                let Some((sibling_slot, back)) = portals.get(&sibling) else {
                    return Err(LevelLoadError::UnmatchedPortal { name });
                };
                if *back != name || *sibling_slot == slot {
                    return Err(LevelLoadError::UnmatchedPortal { name });
                }
                let pair = if name < sibling {
                    (name.clone(), sibling.clone())
                } else {
                    (sibling.clone(), name.clone())
                };
                let next = colours.len();
                let colour_index = *colours.entry(pair).or_insert(next) % PORTAL_COLOURS.len();
                let sibling_id = PieceId::new(*sibling_slot as u32, 0);
                if let PieceKind::Portal(portal) = &mut pieces[slot].kind {
                    portal.sibling = Some(sibling_id);
                    portal.colour_index = colour_index;
                }
                pieces[slot].colour = PORTAL_COLOURS[colour_index];
            }
            Link::Tesla { name, siblings } => {
                let mut connections = Vec::with_capacity(siblings.len());
                for sibling in siblings {
                    let Some(&other) = teslas.get(&sibling) else {
                        return Err(LevelLoadError::UnknownTeslaSibling { name, sibling });
                    };
                    if other != slot {
                        connections.push(PieceId::new(other as u32, 0));
                    }
                }
                if let PieceKind::Tesla(tesla) = &mut pieces[slot].kind {
                    tesla.connections = connections;
                }
            }
        }
    }

    // Connections are symmetric even when only one side lists the other
    let wired: Vec<(usize, PieceId)> = pieces
        .iter()
        .enumerate()
        .filter_map(|(slot, p)| match &p.kind {
            PieceKind::Tesla(t) => Some(t.connections.iter().map(move |c| (slot, *c))),
            _ => None,
        })
        .flatten()
        .collect();
    for (slot, other) in wired {
        let back = PieceId::new(slot as u32, 0);
        if let PieceKind::Tesla(t) = &mut pieces[other.slot()].kind
            && !t.connections.contains(&back)
        {
            t.connections.push(back);
        }
    }
    Ok(())
}

/// Parse a level from its text. `name` labels the level (usually the file stem).
pub fn parse_level(name: &str, text: &str, ctx: &mut SimContext) -> Result<GameLevel, LevelLoadError> {
    let mut tokens = text.split_whitespace().peekable();

    let mut boss_name = None;
    if tokens.peek().is_some_and(|t| t.eq_ignore_ascii_case(BOSS_KEYWORD)) {
        tokens.next();
        boss_name = Some(next_token(&mut tokens, "boss name")?.to_string());
    }

    let (Some(w_token), Some(h_token)) = (tokens.next(), tokens.next()) else {
        return Err(LevelLoadError::MissingDimensions);
    };
    let invalid = || LevelLoadError::InvalidDimensions {
        width: w_token.to_string(),
        height: h_token.to_string(),
    };
    let width = w_token.parse::<usize>().map_err(|_| invalid())?;
    let height = h_token.parse::<usize>().map_err(|_| invalid())?;
    if width == 0 || height == 0 || width > MAX_LEVEL_DIMENSION || height > MAX_LEVEL_DIMENSION {
        return Err(invalid());
    }

    let mut pieces: Vec<Option<LevelPiece>> = vec![None; width * height];
    let mut links = Vec::new();
    for row in 0..height {
        let h = height - 1 - row;
        for col in 0..width {
            let token = next_token(&mut tokens, "a grid piece")?;
            let parsed = parse_piece(Cell { row, col, token }, ctx)?;
            let slot = h * width + col;
            let mut piece = LevelPiece::new(col, h, parsed.kind);
            piece.trigger_id = parsed.trigger_id;
            if let Some(link) = parsed.link {
                links.push((slot, link));
            }
            pieces[slot] = Some(piece);
        }
    }
    let mut pieces: Vec<LevelPiece> = pieces.into_iter().flatten().collect();
    debug_assert_eq!(pieces.len(), width * height);
    resolve_links(&mut pieces, links)?;

    match tokens.next() {
        Some(t) if t == STARS_KEYWORD => {}
        found => {
            return Err(LevelLoadError::MissingStars {
                found: found.map(str::to_string),
            });
        }
    }
    let mut stars: StarMilestones = [0; 5];
    for star in stars.iter_mut() {
        let token = next_token(&mut tokens, "a star milestone")?;
        *star = token.parse().map_err(|_| LevelLoadError::InvalidStars {
            token: token.to_string(),
        })?;
    }

    let mut drop_table = ItemDropTable::new();
    let mut paddle_start_x = None;
    while let Some(token) = tokens.next() {
        if token == PADDLE_START_KEYWORD {
            paddle_start_x = Some(parse_number::<f32>(next_token(&mut tokens, "a paddle start position")?)?);
            continue;
        }
        let items = ItemKind::from_str(token)
            .map(|item| vec![item])
            .or_else(|| ItemKind::keyword_set(token))
            .ok_or_else(|| LevelLoadError::UnknownItem { name: token.to_string() })?;
        let weight = parse_number::<u32>(next_token(&mut tokens, "an item weight")?)?;
        for item in items {
            drop_table.set_weight(item, weight);
        }
    }

    let mut level = GameLevel::new(name, width, height, pieces).ok_or_else(|| LevelLoadError::InvalidDimensions {
        width: width.to_string(),
        height: height.to_string(),
    })?;
    level.set_boss_name(boss_name);
    level.set_star_milestones(stars);
    level.set_drop_table(drop_table);
    level.set_paddle_start_x(paddle_start_x);

    log::info!(
        "loaded level '{}' ({}x{}, {} to destroy{})",
        name,
        width,
        height,
        level.pieces_left(),
        if level.is_boss_level() { ", boss" } else { "" }
    );
    Ok(level)
}

/// Read and parse a level file; the level is named after the file stem
pub fn load_level_file(path: impl AsRef<Path>, ctx: &mut SimContext) -> Result<GameLevel, LevelLoadError> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)?;
    let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("level");
    parse_level(name, &text, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = "\
4 3
X(a,b) E E X(b,a,1)
A(1,0,t1,t2) R{5} B A(0,1,t2)
W(5) G P T(Y,ll)

STARS:
100 200 300 400 500

powerups 3
oneup 10
PADDLESTARTXPOS: 4.5
";

    fn ctx() -> SimContext {
        SimContext::new(11)
    }

    #[test]
    fn test_parse_small_level() {
        let level = parse_level("small", SMALL, &mut ctx()).unwrap();
        assert_eq!((level.width(), level.height()), (4, 3));
        assert_eq!(level.name(), "small");
        assert!(!level.is_boss_level());
        // Red, bomb, green and the breakable triangle must go
        assert_eq!(level.pieces_left(), 4);
        assert_eq!(level.star_milestones(), &[100, 200, 300, 400, 500]);
        assert_eq!(level.paddle_start_x(), Some(4.5));
        assert_eq!(level.drop_table().weight(ItemKind::OneUp), 10);
        assert_eq!(level.drop_table().weight(ItemKind::UberBall), 3);
        assert_eq!(level.drop_table().weight(ItemKind::Poison), 0);
    }

    #[test]
    fn test_top_row_is_listed_first() {
        let level = parse_level("small", SMALL, &mut ctx()).unwrap();
        assert!(matches!(level.piece_at(0, 2).unwrap().kind, PieceKind::Portal(_)));
        assert!(matches!(level.piece_at(0, 0).unwrap().kind, PieceKind::Switch(_)));
        assert!(matches!(
            level.piece_at(3, 0).unwrap().kind,
            PieceKind::Triangle(TriangleBlock {
                behaviour: TriangleBehaviour::Breakable(BreakableStage::Yellow),
                orientation: TriangleOrientation::LowerLeft,
                ..
            })
        ));
    }

    #[test]
    fn test_portals_pair_up() {
        let level = parse_level("small", SMALL, &mut ctx()).unwrap();
        let a = level.id_at(0, 2).unwrap();
        let b = level.id_at(3, 2).unwrap();
        let PieceKind::Portal(pa) = &level.piece(a).unwrap().kind else {
            panic!("not a portal");
        };
        let PieceKind::Portal(pb) = &level.piece(b).unwrap().kind else {
            panic!("not a portal");
        };
        assert_eq!(pa.sibling, Some(b));
        assert_eq!(pb.sibling, Some(a));
        assert_eq!(pa.colour_index, pb.colour_index);
        assert!(!pa.flips_paddle);
        assert!(pb.flips_paddle);
    }

    #[test]
    fn test_tesla_connections_and_trigger_ids() {
        let level = parse_level("small", SMALL, &mut ctx()).unwrap();
        let t1 = level.id_at(0, 1).unwrap();
        let t2 = level.id_at(3, 1).unwrap();
        let PieceKind::Tesla(tesla) = &level.piece(t2).unwrap().kind else {
            panic!("not a tesla block");
        };
        assert_eq!(tesla.connections, vec![t1]);
        // Only one end is on, so no arc yet
        assert!(!level.tesla_arc_exists(t1, t2));
        assert_eq!(level.triggerable_pieces(5), &[level.id_at(1, 1).unwrap()]);
    }

    #[test]
    fn test_tesla_f_flag_is_false_portal_f_flips() {
        let text = "2 2 A(t,f,t1,t2) A(f,t,t2) X(a,b,f) X(b,a,0) STARS: 0 0 0 0 0";
        let level = parse_level("flags", text, &mut ctx()).unwrap();
        let PieceKind::Tesla(t1) = &level.piece_at(0, 1).unwrap().kind else {
            panic!("not a tesla block");
        };
        let PieceKind::Tesla(t2) = &level.piece_at(1, 1).unwrap().kind else {
            panic!("not a tesla block");
        };
        assert!(t1.active && !t1.changable);
        assert!(!t2.active && t2.changable);
        let PieceKind::Portal(a) = &level.piece_at(0, 0).unwrap().kind else {
            panic!("not a portal");
        };
        let PieceKind::Portal(b) = &level.piece_at(1, 0).unwrap().kind else {
            panic!("not a portal");
        };
        assert!(a.flips_paddle);
        assert!(!b.flips_paddle);
    }

    #[test]
    fn test_boss_prefix() {
        let text = "boss gothic 1 1 E STARS: 1 2 3 4 5";
        let level = parse_level("boss", text, &mut ctx()).unwrap();
        assert_eq!(level.boss_name(), Some("gothic"));
        assert!(level.is_complete());
    }

    #[test]
    fn test_cannon_angles() {
        let text = "3 1 C(-1) C(0) C1(0-90) STARS: 0 0 0 0 0";
        let level = parse_level("cannons", text, &mut ctx()).unwrap();
        let angle = |w| match &level.piece_at(w, 0).unwrap().kind {
            PieceKind::Cannon(c) => (c.angle, c.fragile),
            other => panic!("not a cannon: {:?}", other),
        };
        assert_eq!(angle(0), (CannonAngle::Free, false));
        assert_eq!(angle(1), (CannonAngle::Fixed(90.0), false));
        assert_eq!(angle(2), (CannonAngle::Range(0.0, 90.0), true));
    }

    #[test]
    fn test_turrets_and_regen() {
        let text = "5 1 H J M Q(f) Q(i) STARS: 0 0 0 0 0";
        let level = parse_level("t", text, &mut ctx()).unwrap();
        assert_eq!(level.ai_pieces().len(), 3);
        assert!(matches!(level.piece_at(3, 0).unwrap().kind, PieceKind::Regen { life: Some(_) }));
        assert!(matches!(level.piece_at(4, 0).unwrap().kind, PieceKind::Regen { life: None }));
    }

    #[test]
    fn test_dimension_errors() {
        assert!(matches!(parse_level("x", "", &mut ctx()), Err(LevelLoadError::MissingDimensions)));
        assert!(matches!(
            parse_level("x", "0 3", &mut ctx()),
            Err(LevelLoadError::InvalidDimensions { .. })
        ));
        assert!(matches!(
            parse_level("x", "two 3", &mut ctx()),
            Err(LevelLoadError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn test_grid_errors() {
        assert!(matches!(
            parse_level("x", "2 1 E", &mut ctx()),
            Err(LevelLoadError::UnexpectedEof { .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 Z STARS: 0 0 0 0 0", &mut ctx()),
            Err(LevelLoadError::InvalidPieceToken { row: 0, col: 0, .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 F(q) STARS: 0 0 0 0 0", &mut ctx()),
            Err(LevelLoadError::MalformedPiece { .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 S{x} STARS: 0 0 0 0 0", &mut ctx()),
            Err(LevelLoadError::MalformedPiece { .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 D(notanitem) STARS: 0 0 0 0 0", &mut ctx()),
            Err(LevelLoadError::UnknownItem { .. })
        ));
    }

    #[test]
    fn test_link_errors() {
        assert!(matches!(
            parse_level("x", "2 1 X(a,b) X(b,c) STARS: 0 0 0 0 0", &mut ctx()),
            Err(LevelLoadError::UnmatchedPortal { .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 X(a,b) STARS: 0 0 0 0 0", &mut ctx()),
            Err(LevelLoadError::UnmatchedPortal { .. })
        ));
        let err = parse_level("x", "2 1 A(1,1,a,b) A(1,1,c) STARS: 0 0 0 0 0", &mut ctx()).unwrap_err();
        assert!(matches!(err, LevelLoadError::UnknownTeslaSibling { ref sibling, .. } if sibling == "b"));
    }

    #[test]
    fn test_trailer_errors() {
        assert!(matches!(
            parse_level("x", "1 1 E", &mut ctx()),
            Err(LevelLoadError::MissingStars { found: None })
        ));
        assert!(matches!(
            parse_level("x", "1 1 E E", &mut ctx()),
            Err(LevelLoadError::MissingStars { found: Some(_) })
        ));
        assert!(matches!(
            parse_level("x", "1 1 E STARS: 1 2 x 4 5", &mut ctx()),
            Err(LevelLoadError::InvalidStars { .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 E STARS: 1 2 3 4 5 oneup lots", &mut ctx()),
            Err(LevelLoadError::InvalidNumber { .. })
        ));
        assert!(matches!(
            parse_level("x", "1 1 E STARS: 1 2 3 4 5 warpdrive 3", &mut ctx()),
            Err(LevelLoadError::UnknownItem { .. })
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_level_file("/nonexistent/level.lvl", &mut ctx()).unwrap_err();
        assert!(matches!(err, LevelLoadError::Io(_)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
