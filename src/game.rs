use std::fmt;

use crate::once_cell_regex;
use crate::role::Role;


const BOARD_CELLS: usize = 9;

const WIN_LINES: [[usize; 3]; 8] = [
    [0, 1, 2],
    [3, 4, 5],
    [6, 7, 8],
    [0, 3, 6],
    [1, 4, 7],
    [2, 5, 8],
    [0, 4, 8],
    [2, 4, 6],
];

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GameStatus {
    Active,
    Victory(Role),
    Draw,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MoveError {
    MalformedMove,
    WrongSide,
    SquareOccupied,
    GameOver,
}

// A move is a square (1 through 9, row-major from the top-left corner) claimed
// by one side. Immutable once parsed.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct GameMove {
    pub square: u8,
    pub player: Role,
}

impl fmt::Display for GameMove {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<-{}", self.square, self.player.mark())
    }
}

#[derive(Clone, Debug)]
pub struct Game {
    board: [Option<Role>; BOARD_CELLS],
    to_move: Role,
    turns_made: u32,
    status: GameStatus,
}

impl Game {
    pub fn new() -> Self {
        Game {
            board: [None; BOARD_CELLS],
            to_move: Role::First,
            turns_made: 0,
            status: GameStatus::Active,
        }
    }

    pub fn status(&self) -> GameStatus { self.status }
    pub fn to_move(&self) -> Role { self.to_move }
    pub fn is_over(&self) -> bool { self.status != GameStatus::Active }

    pub fn winner(&self) -> Option<Role> {
        match self.status {
            GameStatus::Victory(role) => Some(role),
            _ => None,
        }
    }

    // Accepts either a bare square ("5") or a square with an explicit mark
    // ("5<-X"). A bare square is credited to `role` when given, to the side on
    // the move otherwise. If `role` is given, it must be on the move.
    pub fn parse_move(&self, role: Option<Role>, text: &str) -> Result<GameMove, MoveError> {
        let move_re = once_cell_regex!(r"^([1-9])(?:<-([XO]))?$");
        if let Some(role) = role {
            if role != self.to_move {
                return Err(MoveError::WrongSide);
            }
        }
        let caps = move_re.captures(text).ok_or(MoveError::MalformedMove)?;
        let square = caps.get(1).unwrap().as_str().parse::<u8>().unwrap();
        let player = match caps.get(2) {
            Some(mark) if mark.as_str() == "X" => Role::First,
            Some(_) => Role::Second,
            None => role.unwrap_or(self.to_move),
        };
        Ok(GameMove { square, player })
    }

    pub fn apply_move(&mut self, mv: GameMove) -> Result<(), MoveError> {
        if self.is_over() {
            return Err(MoveError::GameOver);
        }
        if !(1..=9).contains(&mv.square) {
            return Err(MoveError::MalformedMove);
        }
        if mv.player != self.to_move {
            return Err(MoveError::WrongSide);
        }
        let cell = &mut self.board[usize::from(mv.square) - 1];
        if cell.is_some() {
            return Err(MoveError::SquareOccupied);
        }
        *cell = Some(mv.player);
        self.to_move = self.to_move.opponent();
        self.turns_made += 1;
        if self.is_won_by(mv.player) {
            self.status = GameStatus::Victory(mv.player);
        } else if self.turns_made >= BOARD_CELLS as u32 {
            self.status = GameStatus::Draw;
        }
        Ok(())
    }

    pub fn resign(&mut self, role: Role) -> Result<(), MoveError> {
        if self.is_over() {
            return Err(MoveError::GameOver);
        }
        self.status = GameStatus::Victory(role.opponent());
        Ok(())
    }

    // Canonical board text: three rows separated by dashes, then a line naming
    // the side on the move. The turn line is rendered even for finished games.
    pub fn render(&self) -> String {
        let cell = |i: usize| self.board[i].map_or(' ', Role::mark);
        format!(
            "{}|{}|{}\n-----\n{}|{}|{}\n-----\n{}|{}|{}\nIt's {}'s turn\n",
            cell(0), cell(1), cell(2),
            cell(3), cell(4), cell(5),
            cell(6), cell(7), cell(8),
            self.to_move.mark(),
        )
    }

    fn is_won_by(&self, player: Role) -> bool {
        WIN_LINES
            .iter()
            .any(|line| line.iter().all(|&i| self.board[i] == Some(player)))
    }
}

impl Default for Game {
    fn default() -> Self { Game::new() }
}
