//! Bytecode instruction set and decoder.
//!
//! Function objects and code properties hold a flat byte stream: a one-byte
//! local-variable count, then instructions.  Operands are little-endian;
//! inline strings carry their usual counted-length prefix.  Jump targets
//! are signed offsets relative to the first byte after the operand.

use crate::errors::TadsError;
use crate::value::read_u16;

pub const OPC_PUSHNUM: u8 = 0x01;
pub const OPC_PUSHOBJ: u8 = 0x02;
pub const OPC_PUSHSTR: u8 = 0x03;
pub const OPC_PUSHLST: u8 = 0x04;
pub const OPC_PUSHNIL: u8 = 0x05;
pub const OPC_PUSHTRUE: u8 = 0x06;
pub const OPC_PUSHFN: u8 = 0x07;
pub const OPC_PUSHPRP: u8 = 0x08;
pub const OPC_PUSHSELF: u8 = 0x09;
pub const OPC_GETLCL: u8 = 0x0a;
pub const OPC_SETLCL: u8 = 0x0b;
pub const OPC_DISCARD: u8 = 0x0c;
pub const OPC_ADD: u8 = 0x10;
pub const OPC_SUB: u8 = 0x11;
pub const OPC_MUL: u8 = 0x12;
pub const OPC_DIV: u8 = 0x13;
pub const OPC_NEG: u8 = 0x14;
pub const OPC_MOD: u8 = 0x15;
pub const OPC_EQ: u8 = 0x18;
pub const OPC_NE: u8 = 0x19;
pub const OPC_LT: u8 = 0x1a;
pub const OPC_LE: u8 = 0x1b;
pub const OPC_GT: u8 = 0x1c;
pub const OPC_GE: u8 = 0x1d;
pub const OPC_NOT: u8 = 0x1e;
pub const OPC_JMP: u8 = 0x20;
pub const OPC_JT: u8 = 0x21;
pub const OPC_JF: u8 = 0x22;
pub const OPC_BUILTIN: u8 = 0x28;
pub const OPC_CALL: u8 = 0x29;
pub const OPC_RET: u8 = 0x2a;
pub const OPC_RETVAL: u8 = 0x2b;
pub const OPC_GETP: u8 = 0x2c;
pub const OPC_SAY: u8 = 0x2d;
pub const OPC_SETP: u8 = 0x2e;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    PushNum(i32),
    PushObj(u16),
    /// Inline string payload (text without the length prefix).
    PushStr(Vec<u8>),
    /// Inline list payload (tagged elements without the length prefix).
    PushList(Vec<u8>),
    PushNil,
    PushTrue,
    PushFn(u16),
    PushProp(u16),
    PushSelf,
    GetLocal(u8),
    SetLocal(u8),
    Discard,
    Add,
    Sub,
    Mul,
    Div,
    Neg,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Not,
    Jmp(i16),
    Jt(i16),
    Jf(i16),
    Builtin { argc: u8, index: u16 },
    Call { argc: u8, target: u16 },
    Ret,
    RetVal,
    GetProp { argc: u8, prop: u16 },
    /// Store the popped value into the popped object's property.
    SetProp(u16),
    Say(Vec<u8>),
}

impl Instruction {
    /// Decode one instruction; returns the instruction and the offset of
    /// the next one.
    pub fn decode(code: &[u8], pc: usize) -> Result<(Instruction, usize), TadsError> {
        let op = *code.get(pc).ok_or(TadsError::StackUnderflow)?;
        let need = |n: usize| -> Result<(), TadsError> {
            if pc + 1 + n > code.len() {
                Err(TadsError::BadOpcode(op))
            } else {
                Ok(())
            }
        };
        let at = pc + 1;
        match op {
            OPC_PUSHNUM => {
                need(4)?;
                let v = i32::from_le_bytes([code[at], code[at + 1], code[at + 2], code[at + 3]]);
                Ok((Instruction::PushNum(v), at + 4))
            }
            OPC_PUSHOBJ => {
                need(2)?;
                Ok((Instruction::PushObj(read_u16(code, at)), at + 2))
            }
            OPC_PUSHSTR | OPC_SAY => {
                need(2)?;
                let len = read_u16(code, at) as usize;
                if len < 2 || at + len > code.len() {
                    return Err(TadsError::BadOpcode(op));
                }
                let text = code[at + 2..at + len].to_vec();
                let insn = if op == OPC_PUSHSTR {
                    Instruction::PushStr(text)
                } else {
                    Instruction::Say(text)
                };
                Ok((insn, at + len))
            }
            OPC_PUSHLST => {
                need(2)?;
                let len = read_u16(code, at) as usize;
                if len < 2 || at + len > code.len() {
                    return Err(TadsError::BadOpcode(op));
                }
                Ok((Instruction::PushList(code[at + 2..at + len].to_vec()), at + len))
            }
            OPC_PUSHNIL => Ok((Instruction::PushNil, at)),
            OPC_PUSHTRUE => Ok((Instruction::PushTrue, at)),
            OPC_PUSHFN => {
                need(2)?;
                Ok((Instruction::PushFn(read_u16(code, at)), at + 2))
            }
            OPC_PUSHPRP => {
                need(2)?;
                Ok((Instruction::PushProp(read_u16(code, at)), at + 2))
            }
            OPC_PUSHSELF => Ok((Instruction::PushSelf, at)),
            OPC_GETLCL => {
                need(1)?;
                Ok((Instruction::GetLocal(code[at]), at + 1))
            }
            OPC_SETLCL => {
                need(1)?;
                Ok((Instruction::SetLocal(code[at]), at + 1))
            }
            OPC_DISCARD => Ok((Instruction::Discard, at)),
            OPC_ADD => Ok((Instruction::Add, at)),
            OPC_SUB => Ok((Instruction::Sub, at)),
            OPC_MUL => Ok((Instruction::Mul, at)),
            OPC_DIV => Ok((Instruction::Div, at)),
            OPC_NEG => Ok((Instruction::Neg, at)),
            OPC_MOD => Ok((Instruction::Mod, at)),
            OPC_EQ => Ok((Instruction::Eq, at)),
            OPC_NE => Ok((Instruction::Ne, at)),
            OPC_LT => Ok((Instruction::Lt, at)),
            OPC_LE => Ok((Instruction::Le, at)),
            OPC_GT => Ok((Instruction::Gt, at)),
            OPC_GE => Ok((Instruction::Ge, at)),
            OPC_NOT => Ok((Instruction::Not, at)),
            OPC_JMP | OPC_JT | OPC_JF => {
                need(2)?;
                let ofs = i16::from_le_bytes([code[at], code[at + 1]]);
                let insn = match op {
                    OPC_JMP => Instruction::Jmp(ofs),
                    OPC_JT => Instruction::Jt(ofs),
                    _ => Instruction::Jf(ofs),
                };
                Ok((insn, at + 2))
            }
            OPC_BUILTIN => {
                need(3)?;
                Ok((
                    Instruction::Builtin {
                        argc: code[at],
                        index: read_u16(code, at + 1),
                    },
                    at + 3,
                ))
            }
            OPC_CALL => {
                need(3)?;
                Ok((
                    Instruction::Call {
                        argc: code[at],
                        target: read_u16(code, at + 1),
                    },
                    at + 3,
                ))
            }
            OPC_RET => Ok((Instruction::Ret, at)),
            OPC_RETVAL => Ok((Instruction::RetVal, at)),
            OPC_GETP => {
                need(3)?;
                Ok((
                    Instruction::GetProp {
                        argc: code[at],
                        prop: read_u16(code, at + 1),
                    },
                    at + 3,
                ))
            }
            OPC_SETP => {
                need(2)?;
                Ok((Instruction::SetProp(read_u16(code, at)), at + 2))
            }
            other => Err(TadsError::BadOpcode(other)),
        }
    }
}

/// Small helper for emitting code streams (used by the game builder and
/// the tests).
#[derive(Default)]
pub struct CodeBuf {
    pub locals: u8,
    buf: Vec<u8>,
}

impl CodeBuf {
    pub fn new(locals: u8) -> Self {
        CodeBuf { locals, buf: Vec::new() }
    }

    pub fn op(&mut self, op: u8) -> &mut Self {
        self.buf.push(op);
        self
    }

    pub fn num(&mut self, v: i32) -> &mut Self {
        self.buf.push(OPC_PUSHNUM);
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn obj(&mut self, o: u16) -> &mut Self {
        self.buf.push(OPC_PUSHOBJ);
        self.buf.extend_from_slice(&o.to_le_bytes());
        self
    }

    pub fn fnaddr(&mut self, o: u16) -> &mut Self {
        self.buf.push(OPC_PUSHFN);
        self.buf.extend_from_slice(&o.to_le_bytes());
        self
    }

    pub fn propnum(&mut self, p: u16) -> &mut Self {
        self.buf.push(OPC_PUSHPRP);
        self.buf.extend_from_slice(&p.to_le_bytes());
        self
    }

    pub fn string(&mut self, text: &[u8]) -> &mut Self {
        self.buf.push(OPC_PUSHSTR);
        self.buf.extend_from_slice(&((text.len() + 2) as u16).to_le_bytes());
        self.buf.extend_from_slice(text);
        self
    }

    pub fn say(&mut self, text: &[u8]) -> &mut Self {
        self.buf.push(OPC_SAY);
        self.buf.extend_from_slice(&((text.len() + 2) as u16).to_le_bytes());
        self.buf.extend_from_slice(text);
        self
    }

    pub fn builtin(&mut self, index: u16, argc: u8) -> &mut Self {
        self.buf.push(OPC_BUILTIN);
        self.buf.push(argc);
        self.buf.extend_from_slice(&index.to_le_bytes());
        self
    }

    pub fn call(&mut self, target: u16, argc: u8) -> &mut Self {
        self.buf.push(OPC_CALL);
        self.buf.push(argc);
        self.buf.extend_from_slice(&target.to_le_bytes());
        self
    }

    pub fn getp(&mut self, prop: u16, argc: u8) -> &mut Self {
        self.buf.push(OPC_GETP);
        self.buf.push(argc);
        self.buf.extend_from_slice(&prop.to_le_bytes());
        self
    }

    pub fn setp(&mut self, prop: u16) -> &mut Self {
        self.buf.push(OPC_SETP);
        self.buf.extend_from_slice(&prop.to_le_bytes());
        self
    }

    /// Finish as a function payload: local count + code.
    pub fn into_code(mut self) -> Vec<u8> {
        let mut out = vec![self.locals];
        out.append(&mut self.buf);
        out
    }
}
