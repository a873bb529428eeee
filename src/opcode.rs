//! The bytecode instruction set.
//!
//! Numbering follows `original_source/libscratch3/src/codegen/opcode.hpp`
//! exactly through `Ext = 0xff`, with one exception: the original
//! reserves three unused slots (`Op_varset`/`Op_varadd`/`Op_varget`)
//! left over from an earlier variable-addressing scheme the source
//! abandoned in favor of `setstatic`/`getstatic`. An `addstatic`
//! opcode, alongside `setstatic`/`getstatic`, has no slot of its own in
//! the original; rather than invent a new number for it, `addstatic`
//! takes over the `varadd` slot (a natural fit — "add to variable" is
//! what that slot always meant), and the two remaining reserved slots
//! stay as decode-time traps (`Reserved0`, `Reserved1`) exactly where
//! the original left them.

use crate::error::VmPanic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Noop = 0x00,
    /// Padding trap: decoding this opcode raises a `VmPanic`.
    Int = 0x01,
    Reserved0 = 0x02,
    AddStatic = 0x03,
    Reserved1 = 0x04,
    SetStatic = 0x05,
    GetStatic = 0x06,
    ListCreate = 0x07,
    Jmp = 0x08,
    Jz = 0x09,
    Jnz = 0x0a,
    Call = 0x0b,
    Ret = 0x0c,
    Enter = 0x0d,
    Leave = 0x0e,
    Yield = 0x0f,
    Pop = 0x10,
    PushNone = 0x11,
    PushInt = 0x12,
    PushReal = 0x13,
    PushTrue = 0x14,
    PushFalse = 0x15,
    PushString = 0x16,
    Push = 0x17,
    Dup = 0x18,
    Eq = 0x19,
    Neq = 0x1a,
    Gt = 0x1b,
    Ge = 0x1c,
    Lt = 0x1d,
    Le = 0x1e,
    Land = 0x1f,
    Lor = 0x20,
    Lnot = 0x21,
    Add = 0x22,
    Sub = 0x23,
    Mul = 0x24,
    Div = 0x25,
    Mod = 0x26,
    Neg = 0x27,
    Round = 0x28,
    Abs = 0x29,
    Floor = 0x2a,
    Ceil = 0x2b,
    Sqrt = 0x2c,
    Sin = 0x2d,
    Cos = 0x2e,
    Tan = 0x2f,
    Asin = 0x30,
    Acos = 0x31,
    Atan = 0x32,
    Ln = 0x33,
    Log10 = 0x34,
    Exp = 0x35,
    Exp10 = 0x36,
    StrCat = 0x37,
    CharAt = 0x38,
    StrLen = 0x39,
    StrStr = 0x3a,
    Inc = 0x3b,
    Dec = 0x3c,
    MoveSteps = 0x3d,
    TurnDegrees = 0x3e,
    Goto = 0x3f,
    GotoXY = 0x40,
    Glide = 0x41,
    GlideXY = 0x42,
    SetDir = 0x43,
    LookAt = 0x44,
    AddX = 0x45,
    SetX = 0x46,
    AddY = 0x47,
    SetY = 0x48,
    BounceOnEdge = 0x49,
    SetRotationStyle = 0x4a,
    GetX = 0x4b,
    GetY = 0x4c,
    GetDir = 0x4d,
    Say = 0x4e,
    Think = 0x4f,
    SetCostume = 0x50,
    NextCostume = 0x51,
    SetBackdrop = 0x52,
    NextBackdrop = 0x53,
    AddSize = 0x54,
    SetSize = 0x55,
    AddGraphicEffect = 0x56,
    SetGraphicEffect = 0x57,
    ClearGraphicEffects = 0x58,
    Show = 0x59,
    Hide = 0x5a,
    GotoLayer = 0x5b,
    MoveLayer = 0x5c,
    GetCostume = 0x5d,
    GetCostumeName = 0x5e,
    GetBackdrop = 0x5f,
    GetSize = 0x60,
    PlaySoundAndWait = 0x61,
    PlaySound = 0x62,
    StopSound = 0x63,
    AddSoundEffect = 0x64,
    SetSoundEffect = 0x65,
    ClearSoundEffects = 0x66,
    AddVolume = 0x67,
    SetVolume = 0x68,
    GetVolume = 0x69,
    OnFlag = 0x6a,
    OnKey = 0x6b,
    OnClick = 0x6c,
    OnBackdropSwitch = 0x6d,
    OnGt = 0x6e,
    OnEvent = 0x6f,
    Send = 0x70,
    SendAndWait = 0x71,
    FindEvent = 0x72,
    WaitSecs = 0x73,
    StopAll = 0x74,
    StopSelf = 0x75,
    StopOther = 0x76,
    OnClone = 0x77,
    Clone = 0x78,
    DeleteClone = 0x79,
    Touching = 0x7a,
    TouchingColor = 0x7b,
    ColorTouching = 0x7c,
    DistanceTo = 0x7d,
    Ask = 0x7e,
    GetAnswer = 0x7f,
    KeyPressed = 0x80,
    MouseDown = 0x81,
    MouseX = 0x82,
    MouseY = 0x83,
    SetDragMode = 0x84,
    GetLoudness = 0x85,
    GetTimer = 0x86,
    ResetTimer = 0x87,
    PropertyOf = 0x88,
    GetTime = 0x89,
    GetDaysSince2000 = 0x8a,
    GetUsername = 0x8b,
    Rand = 0x8c,
    VarShow = 0x8d,
    VarHide = 0x8e,
    ListAdd = 0x8f,
    ListRemove = 0x90,
    ListClear = 0x91,
    ListInsert = 0x92,
    ListReplace = 0x93,
    ListAt = 0x94,
    ListFind = 0x95,
    ListLen = 0x96,
    ListContains = 0x97,
    Ext = 0xff,
}

impl TryFrom<u8> for OpCode {
    type Error = VmPanic;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use OpCode::*;
        Ok(match byte {
            0x00 => Noop,
            0x01 => Int,
            0x02 => Reserved0,
            0x03 => AddStatic,
            0x04 => Reserved1,
            0x05 => SetStatic,
            0x06 => GetStatic,
            0x07 => ListCreate,
            0x08 => Jmp,
            0x09 => Jz,
            0x0a => Jnz,
            0x0b => Call,
            0x0c => Ret,
            0x0d => Enter,
            0x0e => Leave,
            0x0f => Yield,
            0x10 => Pop,
            0x11 => PushNone,
            0x12 => PushInt,
            0x13 => PushReal,
            0x14 => PushTrue,
            0x15 => PushFalse,
            0x16 => PushString,
            0x17 => Push,
            0x18 => Dup,
            0x19 => Eq,
            0x1a => Neq,
            0x1b => Gt,
            0x1c => Ge,
            0x1d => Lt,
            0x1e => Le,
            0x1f => Land,
            0x20 => Lor,
            0x21 => Lnot,
            0x22 => Add,
            0x23 => Sub,
            0x24 => Mul,
            0x25 => Div,
            0x26 => Mod,
            0x27 => Neg,
            0x28 => Round,
            0x29 => Abs,
            0x2a => Floor,
            0x2b => Ceil,
            0x2c => Sqrt,
            0x2d => Sin,
            0x2e => Cos,
            0x2f => Tan,
            0x30 => Asin,
            0x31 => Acos,
            0x32 => Atan,
            0x33 => Ln,
            0x34 => Log10,
            0x35 => Exp,
            0x36 => Exp10,
            0x37 => StrCat,
            0x38 => CharAt,
            0x39 => StrLen,
            0x3a => StrStr,
            0x3b => Inc,
            0x3c => Dec,
            0x3d => MoveSteps,
            0x3e => TurnDegrees,
            0x3f => Goto,
            0x40 => GotoXY,
            0x41 => Glide,
            0x42 => GlideXY,
            0x43 => SetDir,
            0x44 => LookAt,
            0x45 => AddX,
            0x46 => SetX,
            0x47 => AddY,
            0x48 => SetY,
            0x49 => BounceOnEdge,
            0x4a => SetRotationStyle,
            0x4b => GetX,
            0x4c => GetY,
            0x4d => GetDir,
            0x4e => Say,
            0x4f => Think,
            0x50 => SetCostume,
            0x51 => NextCostume,
            0x52 => SetBackdrop,
            0x53 => NextBackdrop,
            0x54 => AddSize,
            0x55 => SetSize,
            0x56 => AddGraphicEffect,
            0x57 => SetGraphicEffect,
            0x58 => ClearGraphicEffects,
            0x59 => Show,
            0x5a => Hide,
            0x5b => GotoLayer,
            0x5c => MoveLayer,
            0x5d => GetCostume,
            0x5e => GetCostumeName,
            0x5f => GetBackdrop,
            0x60 => GetSize,
            0x61 => PlaySoundAndWait,
            0x62 => PlaySound,
            0x63 => StopSound,
            0x64 => AddSoundEffect,
            0x65 => SetSoundEffect,
            0x66 => ClearSoundEffects,
            0x67 => AddVolume,
            0x68 => SetVolume,
            0x69 => GetVolume,
            0x6a => OnFlag,
            0x6b => OnKey,
            0x6c => OnClick,
            0x6d => OnBackdropSwitch,
            0x6e => OnGt,
            0x6f => OnEvent,
            0x70 => Send,
            0x71 => SendAndWait,
            0x72 => FindEvent,
            0x73 => WaitSecs,
            0x74 => StopAll,
            0x75 => StopSelf,
            0x76 => StopOther,
            0x77 => OnClone,
            0x78 => Clone,
            0x79 => DeleteClone,
            0x7a => Touching,
            0x7b => TouchingColor,
            0x7c => ColorTouching,
            0x7d => DistanceTo,
            0x7e => Ask,
            0x7f => GetAnswer,
            0x80 => KeyPressed,
            0x81 => MouseDown,
            0x82 => MouseX,
            0x83 => MouseY,
            0x84 => SetDragMode,
            0x85 => GetLoudness,
            0x86 => GetTimer,
            0x87 => ResetTimer,
            0x88 => PropertyOf,
            0x89 => GetTime,
            0x8a => GetDaysSince2000,
            0x8b => GetUsername,
            0x8c => Rand,
            0x8d => VarShow,
            0x8e => VarHide,
            0x8f => ListAdd,
            0x90 => ListRemove,
            0x91 => ListClear,
            0x92 => ListInsert,
            0x93 => ListReplace,
            0x94 => ListAt,
            0x95 => ListFind,
            0x96 => ListLen,
            0x97 => ListContains,
            0xff => Ext,
            other => return Err(VmPanic::InvalidBytecode { reason: format!("unknown opcode {other:#04x}") }),
        })
    }
}

/// Extension namespace id, the operand the `ext` opcode dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtId {
    Invalid = 0x00,
    Pen = 0x01,
}

impl TryFrom<u8> for ExtId {
    type Error = VmPanic;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(ExtId::Invalid),
            0x01 => Ok(ExtId::Pen),
            other => Err(VmPanic::InvalidBytecode { reason: format!("unknown extension id {other:#04x}") }),
        }
    }
}

/// Pen extension sub-opcodes, selected by `ext`'s second operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PenOp {
    Noop = 0x00,
    Erase = 0x10,
    Stamp = 0x11,
    PenDown = 0x12,
    PenUp = 0x13,
    AddParam = 0x14,
    SetParam = 0x15,
    FindParam = 0x16,
    AddSize = 0x17,
    SetSize = 0x18,
}

impl TryFrom<u8> for PenOp {
    type Error = VmPanic;
    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use PenOp::*;
        Ok(match byte {
            0x00 => Noop,
            0x10 => Erase,
            0x11 => Stamp,
            0x12 => PenDown,
            0x13 => PenUp,
            0x14 => AddParam,
            0x15 => SetParam,
            0x16 => FindParam,
            0x17 => AddSize,
            0x18 => SetSize,
            other => return Err(VmPanic::InvalidBytecode { reason: format!("unknown pen opcode {other:#04x}") }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_defined_opcode() {
        for byte in 0u8..=0x97 {
            let op = OpCode::try_from(byte).expect("opcode should decode");
            assert_eq!(op as u8, byte);
        }
        assert_eq!(OpCode::try_from(0xff).unwrap() as u8, 0xff);
    }

    #[test]
    fn unknown_opcode_is_a_panic() {
        assert!(OpCode::try_from(0x9f).is_err());
    }
}
