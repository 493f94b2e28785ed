use strum::EnumIter;


// The two sides of a game, distinguished by who moves first. The wire protocol
// additionally has a "no role" sentinel, which is `Option::<Role>::None`
// everywhere off the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, EnumIter)]
pub enum Role {
    First,
    Second,
}

impl Role {
    pub fn opponent(self) -> Self {
        match self {
            Role::First => Role::Second,
            Role::Second => Role::First,
        }
    }

    pub fn mark(self) -> char {
        match self {
            Role::First => 'X',
            Role::Second => 'O',
        }
    }
}

pub fn role_to_wire(role: Option<Role>) -> u8 {
    match role {
        None => 0,
        Some(Role::First) => 1,
        Some(Role::Second) => 2,
    }
}

pub fn role_from_wire(value: u8) -> Result<Option<Role>, u8> {
    match value {
        0 => Ok(None),
        1 => Ok(Some(Role::First)),
        2 => Ok(Some(Role::Second)),
        _ => Err(value),
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn opponent_is_an_involution() {
        for role in Role::iter() {
            assert_ne!(role.opponent(), role);
            assert_eq!(role.opponent().opponent(), role);
        }
    }

    #[test]
    fn wire_encoding_round_trips() {
        for wire in 0..=2 {
            assert_eq!(role_to_wire(role_from_wire(wire).unwrap()), wire);
        }
        assert!(role_from_wire(3).is_err());
    }
}
