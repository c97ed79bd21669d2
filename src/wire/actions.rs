//! Actions and instructions carried by flow-mods and packet-outs.

use byteorder::{ByteOrder, NetworkEndian};

use super::oxm;
use crate::oxm::Field;
use crate::port::PortNumber;
use crate::{Error, Repr, Result};

mod consts {
    pub const ACTION_OUTPUT: u16 = 0;
    pub const ACTION_SET_FIELD: u16 = 25;

    pub const INSTRUCTION_GOTO_TABLE: u16 = 1;
    pub const INSTRUCTION_APPLY_ACTIONS: u16 = 4;
}

fn pad8(len: usize) -> usize {
    ((len + 7) / 8) * 8
}

/// One action of an action list.
///
/// ```no_rust
/// +---------------+---------------+
/// |      type     |     length    |
/// +---------------+---------------+
/// |      type-specific payload    |
/// |   (variable, 8-byte aligned)  |
/// +-------------------------------+
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Action {
    /// Forward out a port, asking for `max_len` bytes on a controller
    /// port.
    Output { port: PortNumber, max_len: u16 },
    /// Rewrite one header field.
    SetField(Field),
}

mod field {
    use crate::field::*;

    pub const KIND: Field = 0..2;
    pub const LENGTH: Field = 2..4;

    // output payload
    pub const PORT: Field = 4..8;
    pub const MAX_LEN: Field = 8..10;
    pub const OUTPUT_PAD: Field = 10..16;

    // set-field payload
    pub const OXM: Rest = 4..;
}

impl Repr for Action {
    fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < field::LENGTH.end {
            return Err(Error::Truncated);
        }
        let kind = NetworkEndian::read_u16(&buffer[field::KIND]);
        let length = NetworkEndian::read_u16(&buffer[field::LENGTH]) as usize;
        if length < field::LENGTH.end || buffer.len() < length {
            return Err(Error::Truncated);
        }
        match kind {
            consts::ACTION_OUTPUT => {
                if length != field::OUTPUT_PAD.end {
                    return Err(Error::Malformed);
                }
                Ok(Action::Output {
                    port: NetworkEndian::read_u32(&buffer[field::PORT]).into(),
                    max_len: NetworkEndian::read_u16(&buffer[field::MAX_LEN]),
                })
            }
            consts::ACTION_SET_FIELD => {
                let (f, _) = oxm::parse(&buffer[field::OXM.start..length])?;
                Ok(Action::SetField(f))
            }
            _ => Err(Error::Unrecognized),
        }
    }

    fn buffer_len(&self) -> usize {
        match self {
            Action::Output { .. } => field::OUTPUT_PAD.end,
            Action::SetField(f) => pad8(field::OXM.start + oxm::buffer_len(f)),
        }
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        let len = self.buffer_len();
        if buffer.len() < len {
            return Err(Error::Exhausted);
        }
        NetworkEndian::write_u16(&mut buffer[field::LENGTH], len as u16);
        match self {
            Action::Output { port, max_len } => {
                NetworkEndian::write_u16(&mut buffer[field::KIND], consts::ACTION_OUTPUT);
                NetworkEndian::write_u32(&mut buffer[field::PORT], (*port).into());
                NetworkEndian::write_u16(&mut buffer[field::MAX_LEN], *max_len);
                buffer[field::OUTPUT_PAD].fill(0);
            }
            Action::SetField(f) => {
                NetworkEndian::write_u16(&mut buffer[field::KIND], consts::ACTION_SET_FIELD);
                let oxm_len = oxm::buffer_len(f);
                oxm::emit(f, &mut buffer[field::OXM.start..field::OXM.start + oxm_len])?;
                buffer[field::OXM.start + oxm_len..len].fill(0);
            }
        }
        Ok(())
    }
}

/// An ordered list of actions.
#[derive(Debug, PartialEq, Eq, Clone, Default)]
pub struct ActionList(Vec<Action>);

impl ActionList {
    pub fn new() -> ActionList {
        ActionList::default()
    }

    pub fn push(&mut self, action: Action) {
        self.0.push(action);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Action> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse exactly `buffer` as a sequence of actions.
    pub fn parse_all(buffer: &[u8]) -> Result<ActionList> {
        let mut actions = Vec::new();
        let mut offset = 0;
        while offset < buffer.len() {
            let action = Action::parse(&buffer[offset..])?;
            offset += action.buffer_len();
            actions.push(action);
        }
        Ok(ActionList(actions))
    }

    pub fn buffer_len(&self) -> usize {
        self.0.iter().fold(0, |acc, a| acc + a.buffer_len())
    }

    pub fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        for action in &self.0 {
            action.emit(&mut buffer[offset..offset + action.buffer_len()])?;
            offset += action.buffer_len();
        }
        Ok(())
    }
}

impl FromIterator<Action> for ActionList {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> ActionList {
        ActionList(iter.into_iter().collect())
    }
}

/// One instruction of a flow-mod.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum Instruction {
    /// Continue matching in another table.
    GotoTable(u8),
    /// Apply the actions immediately.
    ApplyActions(ActionList),
}

mod ifield {
    use crate::field::*;

    pub const KIND: Field = 0..2;
    pub const LENGTH: Field = 2..4;

    // goto-table payload
    pub const TABLE_ID: usize = 4;
    pub const GOTO_PAD: Field = 5..8;

    // apply-actions payload
    pub const APPLY_PAD: Field = 4..8;
    pub const ACTIONS: Rest = 8..;
}

impl Repr for Instruction {
    fn parse(buffer: &[u8]) -> Result<Self> {
        if buffer.len() < ifield::LENGTH.end {
            return Err(Error::Truncated);
        }
        let kind = NetworkEndian::read_u16(&buffer[ifield::KIND]);
        let length = NetworkEndian::read_u16(&buffer[ifield::LENGTH]) as usize;
        if length < ifield::LENGTH.end || buffer.len() < length {
            return Err(Error::Truncated);
        }
        match kind {
            consts::INSTRUCTION_GOTO_TABLE => {
                if length != ifield::GOTO_PAD.end {
                    return Err(Error::Malformed);
                }
                Ok(Instruction::GotoTable(buffer[ifield::TABLE_ID]))
            }
            consts::INSTRUCTION_APPLY_ACTIONS => Ok(Instruction::ApplyActions(
                ActionList::parse_all(&buffer[ifield::ACTIONS.start..length])?,
            )),
            _ => Err(Error::Unrecognized),
        }
    }

    fn buffer_len(&self) -> usize {
        match self {
            Instruction::GotoTable(_) => ifield::GOTO_PAD.end,
            Instruction::ApplyActions(actions) => ifield::ACTIONS.start + actions.buffer_len(),
        }
    }

    fn emit(&self, buffer: &mut [u8]) -> Result<()> {
        let len = self.buffer_len();
        if buffer.len() < len {
            return Err(Error::Exhausted);
        }
        NetworkEndian::write_u16(&mut buffer[ifield::LENGTH], len as u16);
        match self {
            Instruction::GotoTable(table) => {
                NetworkEndian::write_u16(&mut buffer[ifield::KIND], consts::INSTRUCTION_GOTO_TABLE);
                buffer[ifield::TABLE_ID] = *table;
                buffer[ifield::GOTO_PAD].fill(0);
            }
            Instruction::ApplyActions(actions) => {
                NetworkEndian::write_u16(
                    &mut buffer[ifield::KIND],
                    consts::INSTRUCTION_APPLY_ACTIONS,
                );
                buffer[ifield::APPLY_PAD].fill(0);
                actions.emit(&mut buffer[ifield::ACTIONS.start..len])?;
            }
        }
        Ok(())
    }
}

/// Parse a buffer holding a sequence of instructions.
pub fn parse_instructions(buffer: &[u8]) -> Result<Vec<Instruction>> {
    let mut instructions = Vec::new();
    let mut offset = 0;
    while offset < buffer.len() {
        let instruction = Instruction::parse(&buffer[offset..])?;
        offset += instruction.buffer_len();
        instructions.push(instruction);
    }
    Ok(instructions)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::oxm::basic::ETH_DST;

    #[cfg_attr(rustfmt, rustfmt_skip)]
    static OUTPUT_BYTES: [u8; 16] = [
        0x00, 0x00,             // type = output
        0x00, 0x10,             // length = 16
        0x00, 0x00, 0x00, 0x07, // port = 7
        0x00, 0x00,             // max_len
        0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // padding
    ];

    #[test]
    fn test_output_roundtrip() {
        let action = Action::Output {
            port: PortNumber::Regular(7),
            max_len: 0,
        };
        assert_eq!(action.buffer_len(), 16);
        let mut buf = [0xff; 16];
        action.emit(&mut buf).unwrap();
        assert_eq!(&buf[..], &OUTPUT_BYTES[..]);
        assert_eq!(Action::parse(&buf).unwrap(), action);
    }

    #[test]
    fn test_set_field_roundtrip() {
        let action = Action::SetField(ETH_DST.value_of(0x1122_3344_5566).to_exact_field());
        // 4 header + 10 oxm, padded to 16
        assert_eq!(action.buffer_len(), 16);
        let mut buf = [0xff; 16];
        action.emit(&mut buf).unwrap();
        assert_eq!(Action::parse(&buf).unwrap(), action);
    }

    #[test]
    fn test_action_list() {
        let list: ActionList = [
            Action::SetField(ETH_DST.value_of(1).to_exact_field()),
            Action::Output {
                port: PortNumber::Flood,
                max_len: 0,
            },
        ]
        .into_iter()
        .collect();
        let mut buf = vec![0; list.buffer_len()];
        list.emit(&mut buf).unwrap();
        assert_eq!(ActionList::parse_all(&buf).unwrap(), list);
    }

    #[test]
    fn test_instructions_roundtrip() {
        let instructions = vec![
            Instruction::GotoTable(2),
            Instruction::ApplyActions(
                [Action::Output {
                    port: PortNumber::Controller,
                    max_len: 128,
                }]
                .into_iter()
                .collect(),
            ),
        ];
        let len: usize = instructions.iter().map(|i| i.buffer_len()).sum();
        let mut buf = vec![0; len];
        let mut offset = 0;
        for i in &instructions {
            i.emit(&mut buf[offset..]).unwrap();
            offset += i.buffer_len();
        }
        assert_eq!(parse_instructions(&buf).unwrap(), instructions);
    }
}
