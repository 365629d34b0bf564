//! USSE instruction decoder
//!
//! Turns a raw 64-bit word into an [`Instruction`]. Decoding is total: any
//! word that matches no family, or that selects a reserved sub-encoding,
//! comes back as [`Opcode::Illegal`].

use super::helpers::*;
use super::matcher::{match_word, Family, Fields};
use super::types::*;

/// Per-program decoding knobs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeContext {
    /// Decoding the secondary program, whose results land in SA
    pub secondary_program: bool,
}

/// Decode a primary-program instruction word
pub fn decode(word: u64) -> Instruction {
    decode_with(word, DecodeContext::default())
}

pub fn decode_with(word: u64, ctx: DecodeContext) -> Instruction {
    let Some(pattern) = match_word(word) else {
        return Instruction::illegal(word);
    };
    let f = pattern.fields(word);
    let d = Decoder {
        word,
        f,
        secondary: ctx.secondary_program,
    };

    match pattern.family {
        Family::Vmov => d.vmov(),
        Family::Vmad => d.vmad(),
        Family::Vmad2 => d.vmad2(),
        Family::Vnmad32 => d.vnmad(true),
        Family::Vnmad16 => d.vnmad(false),
        Family::Vpck => d.vpck(),
        Family::Sop2 => d.sop2(),
        Family::Vtst => d.vtst(),
        Family::Vtstmsk => d.vtstmsk(),
        Family::Vbw => d.vbw(),
        Family::Phas => Instruction::new(word, Opcode::Phas),
        Family::Nop => Instruction::new(word, Opcode::Nop),
        Family::Br => d.br(),
        Family::Smp => d.smp(),
        Family::Smlsi => d.smlsi(),
        Family::Kill => d.kill(),
        Family::Spec => Instruction::new(word, Opcode::Spec),
        Family::Vcomp => d.vcomp(),
        Family::Vdp => d.vdp(),
        Family::Vdual => d.vdual(),
        Family::Vldst => d.vldst(),
    }
}

/// Predicate of the vector ALU families, which have no NegP1
fn vector_predicate(bits: u32) -> ExtPredicate {
    match bits & 7 {
        0 => ExtPredicate::None,
        1 => ExtPredicate::P0,
        2 => ExtPredicate::P1,
        3 => ExtPredicate::P2,
        4 => ExtPredicate::P3,
        5 => ExtPredicate::NegP0,
        _ => ExtPredicate::Pn,
    }
}

fn width(vec4: bool) -> SwizzleWidth {
    if vec4 {
        SwizzleWidth::Vec4
    } else {
        SwizzleWidth::Vec3
    }
}

fn gpi_operand(slot: OperandSlot, num: u32) -> Operand {
    let mut op = internal_operand(slot, num);
    op.flags = RegisterFlags::GPI;
    op
}

/// Swizzle built from four 2-bit component selectors
fn component_swizzle(sel: [u32; 4]) -> Swizzle4 {
    sel.map(|s| SwizzleChannel::from_bits(s & 3))
}

struct Decoder<'a> {
    word: u64,
    f: Fields<'a>,
    secondary: bool,
}

impl Decoder<'_> {
    fn get(&self, letter: char) -> u32 {
        self.f.get(letter)
    }

    fn flag(&self, letter: char) -> bool {
        self.f.flag(letter)
    }

    fn enc(&self, double: bool, bits: u8) -> RegisterEncoding {
        RegisterEncoding::new(double, bits, self.secondary)
    }

    fn inst(&self, opcode: Opcode) -> Instruction {
        Instruction::new(self.word, opcode)
    }

    fn illegal(&self) -> Instruction {
        Instruction::illegal(self.word)
    }

    //=========================================================================
    // DATA MOVEMENT
    //=========================================================================

    fn vmov(&self) -> Instruction {
        let (opcode, move_type) = match self.get('m') {
            0 => (Opcode::Vmov, MoveType::Unconditional),
            1 => (Opcode::Vmovc, MoveType::Conditional),
            2 => (Opcode::Vmovcu8, MoveType::ConditionalU8),
            _ => return self.illegal(),
        };
        let data_type = DataType::from_index(self.get('o'));
        let double = matches!(data_type, DataType::C10 | DataType::F16 | DataType::F32);
        let enc = self.enc(double, if double { 7 } else { 6 });

        let mut inst = self.inst(opcode);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.repeat_count = self.get('a') as u8;

        inst.dest = enc.dest(self.get('j'), self.get('l'), self.flag('d'));
        inst.dest.data_type = data_type;
        inst.dest_mask = decode_write_mask(inst.dest.bank, self.get('h'), data_type == DataType::F16);

        inst.src1 = enc.src12(OperandSlot::Src1, self.get('u'), self.get('f'), self.flag('c'));
        inst.src1.swizzle = decode_vec34_swizzle(self.get('w'), false, SwizzleWidth::Vec4);
        inst.src1.data_type = data_type;

        let compare = CompareMethod::from((self.get('t') << 1) | self.get('i'));
        if move_type != MoveType::Unconditional {
            inst.src0 = enc.src0(self.get('q'), self.get('k'), self.flag('e'));
            inst.src0.data_type = if move_type == MoveType::ConditionalU8 {
                DataType::Uint8
            } else {
                data_type
            };
            if self.flag('r') {
                inst.src0.swizzle = inst.src1.swizzle;
            }
            inst.src2 = enc.src12(OperandSlot::Src2, self.get('v'), self.get('g'), self.flag('b'));
            inst.src2.swizzle = inst.src1.swizzle;
            inst.src2.data_type = data_type;
        }

        inst.detail = InstructionDetail::Move { move_type, compare };
        inst
    }

    fn vpck(&self) -> Instruction {
        const FORMATS: [DataType; 8] = [
            DataType::Uint8,
            DataType::Int8,
            DataType::O8,
            DataType::Uint16,
            DataType::Int16,
            DataType::F16,
            DataType::F32,
            DataType::C10,
        ];
        let src_type = FORMATS[self.get('f') as usize & 7];
        let dest_type = FORMATS[self.get('t') as usize & 7];

        // C10 only converts to and from the float formats
        let float_like = |t: DataType| matches!(t, DataType::F16 | DataType::F32 | DataType::C10);
        if (src_type == DataType::C10 && !float_like(dest_type))
            || (dest_type == DataType::C10 && !float_like(src_type))
        {
            return self.illegal();
        }

        let mut inst = self.inst(Opcode::Vpck);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.repeat_count = self.get('a') as u8;
        inst.dest_mask = self.get('m') as u8;
        let scale = self.flag('h');

        inst.dest = self.enc(false, 7).dest(self.get('g'), self.get('b'), self.flag('d'));
        inst.dest.data_type = dest_type;

        let src_float = float_like(src_type);
        let src1_n = if src_float {
            self.get('q')
        } else {
            // Integer sources address single registers with an extra low bit
            self.get('v') | (self.get('q') << 1)
        };
        inst.src1 = self
            .enc(src_float, 7)
            .src12(OperandSlot::Src1, src1_n, self.get('k'), self.flag('r'));
        inst.src1.data_type = src_type;

        let high_bit = if src_type == DataType::F32 {
            self.get('v')
        } else {
            self.get('w') & 1
        };
        let comp0 = self.get('x') | (high_bit << 1);
        inst.src1.swizzle = component_swizzle([comp0, self.get('i'), self.get('j'), self.get('o')]);

        if src_type == DataType::F32 {
            // Two F32 registers each supply a pair of lanes
            inst.src2 = self
                .enc(true, 7)
                .src12(OperandSlot::Src2, self.get('w'), self.get('l'), self.flag('c'));
            inst.src2.data_type = DataType::F32;
        } else {
            let keep_lanes = scale && (src_type == DataType::Uint8 || dest_type == DataType::Uint8);
            if !keep_lanes {
                let start = (0..4usize).find(|i| inst.dest_mask & (1 << i) != 0).unwrap_or(0);
                let original = inst.src1.swizzle;
                for (i, ch) in original.iter().enumerate() {
                    inst.src1.swizzle[(i + start) % 4] = *ch;
                }
            }
        }

        inst.detail = InstructionDetail::Pack { scale };
        inst
    }

    fn vldst(&self) -> Instruction {
        let data_type = match self.get('f') {
            0 => DataType::F32,
            1 => DataType::F16,
            2 => DataType::C10,
            _ => return self.illegal(),
        };
        let is_load = match self.get('o') {
            0b01 => true,
            0b10 => false,
            _ => return self.illegal(),
        };

        let mut inst = self.inst(Opcode::Vldst);
        inst.pred = ExtPredicate::from(self.get('p') as u8);

        // Element width in bytes; C10 packs into a single byte slot
        let unit = 4 / (self.get('f') + 1);
        let count = (unit * (self.get('k') + 1)).div_ceil(4) as u8;

        inst.dest = Operand::new(OperandSlot::Dest);
        inst.dest.bank = if self.secondary {
            RegisterBank::SecAttr
        } else if self.flag('t') {
            RegisterBank::PrimAttr
        } else {
            RegisterBank::Temp
        };
        inst.dest.num = self.get('v');
        inst.dest.data_type = data_type;
        inst.dest_mask = 0b0001;

        let enc = self.enc(false, 7);
        inst.src0 = enc.src0(self.get('w'), self.get('h'), self.flag('r'));
        inst.src0.data_type = DataType::Uint32;
        // Offsets are encoded in units of the fetched type
        let raw_offset = self.get('x');
        inst.src1 = enc.src12(OperandSlot::Src1, raw_offset, self.get('q'), self.flag('b'));
        inst.src1.data_type = DataType::Uint32;
        let register_indexed = inst.src1.bank != RegisterBank::Immediate;

        inst.detail = InstructionDetail::LoadStore {
            count,
            buffer: self.get('w') as u8,
            base: raw_offset * unit / 4,
            register_indexed,
            is_load,
        };
        inst
    }

    //=========================================================================
    // FLOAT ALU
    //=========================================================================

    fn vmad(&self) -> Instruction {
        let vec4 = self.flag('o');
        let w = width(vec4);
        let enc = self.enc(true, 7);

        let mut inst = self.inst(Opcode::Vmad);
        inst.pred = vector_predicate(self.get('p'));
        inst.repeat_mode = RepeatMode::from(self.get('i'));
        inst.repeat_count = self.get('t') as u8;
        inst.dest_mask = self.get('w') as u8;

        inst.dest = enc.dest(self.get('m'), self.get('k'), self.flag('d'));
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('B'), self.get('j'), self.flag('r'));
        inst.src0 = gpi_operand(OperandSlot::Src0, self.get('l'));
        inst.src2 = gpi_operand(OperandSlot::Src2, self.get('v'));

        inst.src0.swizzle = decode_vec34_swizzle(self.get('q'), self.flag('z'), w);
        inst.src1.swizzle = decode_vec34_swizzle(self.get('A'), self.flag('y'), w);
        inst.src2.swizzle = decode_vec34_swizzle(self.get('u'), self.flag('g'), w);

        for (letter, flag) in [('b', RegisterFlags::ABSOLUTE), ('c', RegisterFlags::NEGATIVE)] {
            if self.flag(letter) {
                inst.src1.flags |= flag;
            }
        }
        for (letter, flag) in [('a', RegisterFlags::ABSOLUTE), ('x', RegisterFlags::NEGATIVE)] {
            if self.flag(letter) {
                inst.src0.flags |= flag;
            }
        }
        for (letter, flag) in [('h', RegisterFlags::ABSOLUTE), ('f', RegisterFlags::NEGATIVE)] {
            if self.flag(letter) {
                inst.src2.flags |= flag;
            }
        }

        inst.detail = InstructionDetail::Dot {
            components: if vec4 { 4 } else { 3 },
            rotate_mask: false,
        };
        inst
    }

    fn vmad2(&self) -> Instruction {
        let f16 = self.flag('d');
        let data_type = if f16 { DataType::F16 } else { DataType::F32 };
        let enc = self.enc(true, 7);

        let mut inst = self.inst(if f16 { Opcode::Vf16mad } else { Opcode::Vmad });
        inst.pred = ExtPredicate::from(self.get('p') as u8);

        inst.dest = enc.dest(self.get('h'), self.get('t'), false);
        inst.src0 = enc.src0(self.get('l'), self.get('k'), false);
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('q'), self.get('f'), self.flag('b'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('u'), self.get('g'), self.flag('a'));
        inst.dest_mask = decode_write_mask(inst.dest.bank, self.get('e'), f16);

        for op in [&mut inst.dest, &mut inst.src0, &mut inst.src1, &mut inst.src2] {
            op.data_type = data_type;
        }

        let src0_swizzle = self.get('j') | (self.get('r') << 2);
        let src1_swizzle = self.get('z') | (self.get('i') << 2);
        inst.src0.swizzle = VMAD2_SRC0_SWIZZLE[src0_swizzle as usize & 7];
        inst.src1.swizzle = VMAD2_SRC1_SWIZZLE[src1_swizzle as usize & 7];
        inst.src2.swizzle = VMAD2_SRC2_SWIZZLE[self.get('w') as usize & 7];

        if self.flag('c') {
            inst.src0.flags |= RegisterFlags::ABSOLUTE;
        }
        inst.src1.flags = decode_modifier(self.get('m'));
        inst.src2.flags = decode_modifier(self.get('o'));
        inst
    }

    fn vdp(&self) -> Instruction {
        let vec4 = self.flag('o');
        let enc = self.enc(true, 7);

        let mut inst = self.inst(Opcode::Vdp);
        inst.pred = vector_predicate(self.get('p'));
        inst.repeat_mode = RepeatMode::from(self.get('i'));
        inst.repeat_count = self.get('a') as u8;
        inst.dest_mask = self.get('w') as u8;

        inst.dest = enc.dest(self.get('j'), self.get('t'), self.flag('d'));
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('u'), self.get('k'), self.flag('r'));
        inst.src1.swizzle = [
            SwizzleChannel::from_bits(self.get('x')),
            SwizzleChannel::from_bits(self.get('y')),
            SwizzleChannel::from_bits(self.get('q')),
            SwizzleChannel::from_bits(self.get('m')),
        ];
        inst.src2 = gpi_operand(OperandSlot::Src2, self.get('h'));
        inst.src2.swizzle = decode_vec34_swizzle(self.get('z'), false, width(vec4));

        if self.flag('b') {
            inst.src1.flags |= RegisterFlags::NEGATIVE;
        }
        if self.flag('f') {
            inst.src1.flags |= RegisterFlags::ABSOLUTE;
        }
        if self.flag('g') {
            inst.src2.flags |= RegisterFlags::ABSOLUTE;
        }

        inst.detail = InstructionDetail::Dot {
            components: if vec4 { 4 } else { 3 },
            rotate_mask: true,
        };
        inst
    }

    fn vnmad(&self, f32: bool) -> Instruction {
        const F32_OPS: [Opcode; 8] = [
            Opcode::Vmul,
            Opcode::Vadd,
            Opcode::Vfrc,
            Opcode::Vdsx,
            Opcode::Vdsy,
            Opcode::Vmin,
            Opcode::Vmax,
            Opcode::Vdp,
        ];
        const F16_OPS: [Opcode; 8] = [
            Opcode::Vf16mul,
            Opcode::Vf16add,
            Opcode::Vf16frc,
            Opcode::Vf16dsx,
            Opcode::Vf16dsy,
            Opcode::Vf16min,
            Opcode::Vf16max,
            Opcode::Vf16dp,
        ];
        let op2 = self.get('g') as usize & 7;
        let opcode = if f32 { F32_OPS[op2] } else { F16_OPS[op2] };
        let data_type = if f32 { DataType::F32 } else { DataType::F16 };
        let enc = self.enc(true, 7);

        let mut inst = self.inst(opcode);
        inst.pred = vector_predicate(self.get('p'));
        inst.dest_mask = self.get('e') as u8;

        inst.dest = enc.dest(self.get('f'), self.get('t'), self.flag('d'));
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('h'), self.get('k'), self.flag('b'));
        inst.src1.flags = decode_modifier(self.get('m'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('j'), self.get('l'), self.flag('a'));
        if self.get('o') == 1 {
            inst.src2.flags = RegisterFlags::ABSOLUTE;
        }
        for op in [&mut inst.dest, &mut inst.src1, &mut inst.src2] {
            op.data_type = data_type;
        }

        let src1_swizzle =
            self.get('z') | (self.get('i') << 7) | (self.get('c') << 9) | (self.get('r') << 10);
        inst.src1.swizzle = decode_swizzle4(src1_swizzle);
        inst.src2.swizzle = decode_vec34_swizzle(self.get('w'), false, SwizzleWidth::Vec4);

        if matches!(opcode, Opcode::Vdp | Opcode::Vf16dp) {
            // Reduces all four lanes into the single written component
            inst.detail = InstructionDetail::Dot {
                components: 4,
                rotate_mask: false,
            };
        }
        inst
    }

    fn vcomp(&self) -> Instruction {
        const OPS: [(Opcode, ComplexOp); 4] = [
            (Opcode::Vrcp, ComplexOp::Rcp),
            (Opcode::Vrsq, ComplexOp::Rsq),
            (Opcode::Vlog, ComplexOp::Log),
            (Opcode::Vexp, ComplexOp::Exp),
        ];
        const TYPES: [DataType; 4] = [DataType::F32, DataType::F16, DataType::C10, DataType::Unknown];

        let (opcode, op) = OPS[self.get('b') as usize & 3];
        let enc = self.enc(true, 8);

        let mut inst = self.inst(opcode);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.repeat_count = self.get('a') as u8;
        inst.dest_mask = self.get('w') as u8;

        inst.dest = enc.dest(self.get('g'), self.get('t'), self.flag('e'));
        inst.dest.data_type = TYPES[self.get('d') as usize & 3];
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('h'), self.get('k'), self.flag('r'));
        inst.src1.flags = decode_modifier(self.get('m'));
        inst.src1.data_type = TYPES[self.get('c') as usize & 3];

        inst.detail = InstructionDetail::Complex {
            op,
            source_mask: 1 << (self.get('f') & 3),
        };
        inst
    }

    fn sop2(&self) -> Instruction {
        let enc = self.enc(false, 7);

        let mut inst = self.inst(Opcode::Sop2);
        inst.pred = ShortPredicate::from(self.get('p') as u8).into();
        inst.repeat_count = self.get('o') as u8;
        inst.dest_mask = 0b1111;

        inst.dest = enc.dest(self.get('q'), self.get('t'), self.flag('d'));
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('z'), self.get('k'), self.flag('r'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('A'), self.get('j'), self.flag('b'));
        for op in [&mut inst.dest, &mut inst.src1, &mut inst.src2] {
            op.data_type = DataType::Uint8;
        }

        inst.detail = InstructionDetail::Sop2(Sop2Detail {
            color_op: Sop2Op::from_bits(self.get('v')),
            alpha_op: Sop2Op::from_bits(self.get('w')),
            color_sel: [Sop2Select::color(self.get('g')), Sop2Select::color(self.get('h'))],
            alpha_sel: [Sop2Select::alpha(self.get('a')), Sop2Select::alpha(self.get('l'))],
            color_complement: [self.flag('c'), self.flag('m')],
            alpha_complement: [self.flag('f'), self.flag('i')],
            src1_color_complement: self.flag('u'),
            src1_alpha_complement: self.flag('x'),
        });
        inst
    }

    fn vdual(&self) -> Instruction {
        #[derive(Clone, Copy, PartialEq)]
        enum Src {
            Internal0,
            Internal1,
            Internal2,
            Unified,
        }
        use Src::*;

        struct OpInfo {
            src_count: u8,
            vector_load: bool,
            vector_store: bool,
        }

        fn info(opcode: Opcode) -> Option<OpInfo> {
            let (src_count, vector_load, vector_store) = match opcode {
                Opcode::Vmad => (3, true, true),
                Opcode::Vdp => (2, true, false),
                Opcode::Vssq => (1, true, false),
                Opcode::Vmul | Opcode::Vadd => (2, true, true),
                Opcode::Vmov => (1, true, true),
                Opcode::Frsq | Opcode::Frcp | Opcode::Fexp | Opcode::Flog => (1, false, false),
                Opcode::Fmad => (3, false, false),
                Opcode::Fadd | Opcode::Fmul | Opcode::Fsubflr => (2, false, false),
                _ => return None,
            };
            Some(OpInfo {
                src_count,
                vector_load,
                vector_store,
            })
        }

        fn op1_layout(count: u8, config: u32) -> Option<&'static [Src]> {
            Some(match (count, config) {
                (1, 0) => &[Unified],
                (1, 1) => &[Internal0],
                (1, 2) => &[Internal1],
                (1, 3) => &[Internal2],
                (2, 0) => &[Unified, Internal1],
                (2, 1) => &[Internal0, Unified],
                (2, 2) => &[Internal0, Internal1],
                (3, 0) => &[Unified, Internal1, Internal2],
                (3, 1) => &[Internal0, Unified, Internal2],
                (3, 2) => &[Internal0, Internal1, Unified],
                (3, 3) => &[Internal0, Internal1, Internal2],
                _ => return None,
            })
        }

        // The second op's sources depend on what the first op already uses
        fn op2_layout(op1_count: u8, op2_count: u8, config: u32) -> Option<&'static [Src]> {
            Some(match (op1_count, op2_count, config) {
                (1, 1, 0) => &[Internal0],
                (1, 1, _) => &[Unified],
                (1, 2, 0) => &[Internal0, Internal1],
                (1, 2, 1) => &[Unified, Internal1],
                (1, 2, 2) => &[Internal0, Unified],
                (1, 2, 3) => &[Internal1, Unified],
                (1, 3, 0) => &[Internal0, Internal1, Internal2],
                (1, 3, 1) => &[Unified, Internal1, Internal2],
                (1, 3, 2) => &[Internal0, Unified, Internal2],
                (1, 3, 3) => &[Internal0, Unified, Internal1],
                (2, 1, 0) => &[Internal0],
                (2, 1, 1) => &[Internal1],
                (2, 1, 2) => &[Unified],
                (2, 2, 0) => &[Internal0, Internal2],
                (2, 2, 1) => &[Internal1, Internal2],
                (2, 2, 2) => &[Internal2, Unified],
                (3, 1, 0) => &[Internal0],
                (3, 1, 1) => &[Internal1],
                (3, 1, 2) => &[Internal2],
                (3, 1, 3) => &[Unified],
                _ => return None,
            })
        }

        const OP1: [Opcode; 16] = [
            Opcode::Vmad,
            Opcode::Vdp,
            Opcode::Vssq,
            Opcode::Vmul,
            Opcode::Vadd,
            Opcode::Vmov,
            Opcode::Frsq,
            Opcode::Frcp,
            Opcode::Fmad,
            Opcode::Fadd,
            Opcode::Fmul,
            Opcode::Fsubflr,
            Opcode::Fexp,
            Opcode::Flog,
            Opcode::Illegal,
            Opcode::Illegal,
        ];

        let vec4 = self.flag('c');
        let f16 = self.flag('t');
        let ext_or_w = self.flag('d');
        let prim_ustore = self.flag('r');
        let data_type = if f16 { DataType::F16 } else { DataType::F32 };

        let op1_index = (((!vec4 && ext_or_w) as usize) << 3) | self.get('a') as usize;
        let op2_index = ((self.get('l') as usize) << 3) | self.get('o') as usize;
        let op1_code = OP1[op1_index & 15];
        // Slot 0 of the second op table is reserved
        let op2_code = if op2_index & 15 == 0 {
            Opcode::Illegal
        } else {
            OP1[op2_index & 15]
        };
        let (Some(op1_info), Some(op2_info)) = (info(op1_code), info(op2_code)) else {
            return self.illegal();
        };

        let config = self.get('h');
        let (Some(op1_srcs), Some(op2_srcs)) = (
            op1_layout(op1_info.src_count, config),
            op2_layout(op1_info.src_count, op2_info.src_count, config),
        ) else {
            return self.illegal();
        };

        // Only the unified store can reach the register banks
        let unified_vector = if prim_ustore {
            op1_info.vector_store
        } else {
            op2_info.vector_store
        };
        let mut unified_dest = self
            .enc(unified_vector, if unified_vector { 8 } else { 7 })
            .dest(self.get('b'), self.get('m'), false);
        unified_dest.data_type = data_type;
        let mut internal_dest = internal_operand(OperandSlot::Dest, self.get('e'));
        internal_dest.data_type = data_type;

        let write_mask_for = |op: &OpInfo, dest: &Operand| -> u8 {
            if dest.bank == RegisterBank::FpInternal {
                if vec4 { 0b1111 } else { 0b0111 }
            } else if op.vector_store {
                if f16 { 0b1111 } else { 0b0011 }
            } else if f16 {
                0b0011
            } else {
                0b0001
            }
        };
        let fixed_mask = (self.get('y') | (((vec4 && ext_or_w) as u32) << 3)) as u8;

        let (op1_dest, op2_dest) = if prim_ustore {
            (unified_dest, internal_dest)
        } else {
            (internal_dest, unified_dest)
        };
        let (op1_mask, op2_mask) = if prim_ustore {
            (write_mask_for(&op1_info, &op1_dest), fixed_mask)
        } else {
            (fixed_mask, write_mask_for(&op2_info, &op2_dest))
        };

        let op1_count = op1_info.src_count;
        let make_src = |id: Src, slot: OperandSlot, op: &OpInfo| -> Operand {
            let mut src = match id {
                Unified => {
                    let mut src = self
                        .enc(op.vector_load, if op.vector_load { 8 } else { 7 })
                        .src12(slot, self.get('z'), self.get('f'), false);
                    // With fewer than two op1 sources the gpi2 bits are reused
                    let ext = op1_count < 2 && self.flag('j');
                    src.swizzle = decode_dual_swizzle(self.get('u'), ext, vec4);
                    if op1_count <= 2 && self.flag('q') {
                        src.flags |= RegisterFlags::ABSOLUTE;
                    }
                    if self.flag('n') {
                        src.flags |= RegisterFlags::NEGATIVE;
                    }
                    src
                }
                Internal0 => {
                    let mut src = internal_operand(slot, self.get('x'));
                    src.swizzle = decode_dual_swizzle(self.get('i'), false, vec4);
                    src
                }
                Internal1 => {
                    let mut src = internal_operand(slot, self.get('v'));
                    src.swizzle = decode_dual_swizzle(self.get('w'), self.flag('p'), vec4);
                    if self.flag('g') {
                        src.flags |= RegisterFlags::NEGATIVE;
                    }
                    src
                }
                Internal2 => {
                    let num = if op1_count >= 2 {
                        (self.get('j') << 1) | self.get('q')
                    } else {
                        2
                    };
                    internal_operand(slot, num)
                }
            };
            src.data_type = data_type;
            src
        };

        let source_mask_for = |opcode: Opcode, op: &OpInfo, dest_mask: u8| -> u8 {
            if !op.vector_load {
                0b0001
            } else if matches!(opcode, Opcode::Vdp | Opcode::Vssq) {
                if vec4 { 0b1111 } else { 0b0111 }
            } else {
                dest_mask
            }
        };

        let build = |opcode: Opcode, op: &OpInfo, layout: &[Src], dest: Operand, mask: u8| -> DualOp {
            let slots = [OperandSlot::Src0, OperandSlot::Src1, OperandSlot::Src2];
            let mut srcs = [Operand::new(OperandSlot::Src0); 3];
            for (i, id) in layout.iter().enumerate().take(3) {
                srcs[i] = make_src(*id, slots[i], op);
            }
            DualOp {
                opcode,
                dest,
                srcs,
                src_count: layout.len() as u8,
                write_mask: mask,
                source_mask: source_mask_for(opcode, op, mask),
            }
        };

        let first = build(op1_code, &op1_info, op1_srcs, op1_dest, op1_mask);
        let second = build(op2_code, &op2_info, op2_srcs, op2_dest, op2_mask);

        let mut inst = self.inst(Opcode::Vdual);
        inst.pred = match self.get('s') {
            0 => ExtPredicate::None,
            1 => ExtPredicate::P0,
            2 => ExtPredicate::NegP0,
            _ => ExtPredicate::Pn,
        };
        inst.dest = first.dest;
        inst.src0 = first.srcs[0];
        inst.src1 = first.srcs[1];
        inst.src2 = first.srcs[2];
        inst.dest_mask = first.write_mask;
        inst.detail = InstructionDetail::Dual([first, second]);
        inst
    }

    //=========================================================================
    // TEST
    //=========================================================================

    /// ALU operation feeding a test, with the type its sources load as
    fn test_op(&self, alu_sel: u32, alu_op: u32, f32: bool) -> Option<(Opcode, DataType)> {
        use Opcode as O;
        const VF16: [Opcode; 16] = [
            O::Illegal, O::Illegal, O::Vf16add, O::Vf16frc, O::Vrcp, O::Vrsq, O::Vlog, O::Vexp,
            O::Vf16dp, O::Vf16min, O::Vf16max, O::Vf16dsx, O::Vf16dsy, O::Vf16mul, O::Vf16sub, O::Illegal,
        ];
        const VF32: [Opcode; 16] = [
            O::Illegal, O::Illegal, O::Vadd, O::Vfrc, O::Vrcp, O::Vrsq, O::Vlog, O::Vexp,
            O::Vdp, O::Vmin, O::Vmax, O::Vdsx, O::Vdsy, O::Vmul, O::Vsub, O::Illegal,
        ];
        const INT16_32: [Opcode; 16] = [
            O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Iadd16, O::Isub16,
            O::Imul16, O::Iaddu16, O::Isubu16, O::Imulu16, O::Iadd32, O::Iaddu32, O::Isub32, O::Isubu32,
        ];
        const INT8: [Opcode; 16] = [
            O::Iadd8, O::Isub8, O::Iaddu8, O::Isubu8, O::Imul8, O::Fpmul8, O::Imulu8, O::Fpadd8,
            O::Fpsub8, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal,
        ];
        const BITWISE: [Opcode; 16] = [
            O::And, O::Or, O::Xor, O::Shl, O::Shr, O::Rol, O::Illegal, O::Asr,
            O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal, O::Illegal,
        ];

        let index = alu_op as usize & 15;
        let (opcode, data_type) = match alu_sel & 3 {
            0 if f32 => (VF32[index], DataType::F32),
            0 => (VF16[index], DataType::F16),
            1 => {
                let op = INT16_32[index];
                let dt = match op {
                    O::Iaddu32 | O::Isubu32 => DataType::Uint32,
                    O::Iadd32 | O::Isub32 => DataType::Int32,
                    O::Iadd16 | O::Isub16 | O::Imul16 => DataType::Int16,
                    _ => DataType::Uint16,
                };
                (op, dt)
            }
            2 => (INT8[index], DataType::Uint8),
            _ => (BITWISE[index], DataType::Uint32),
        };
        (opcode != O::Illegal).then_some((opcode, data_type))
    }

    fn vtst(&self) -> Instruction {
        let alu_sel = self.get('l');
        let Some((alu_op, load_type)) = self.test_op(alu_sel, self.get('u'), self.flag('a')) else {
            return self.illegal();
        };
        let channel = self.get('h');
        if channel >= 4 {
            return self.illegal();
        }

        let double = alu_sel == 0;
        let enc = self.enc(double, if double { 8 } else { 7 });

        let mut inst = self.inst(Opcode::Vtst);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.repeat_count = self.get('t') as u8;

        inst.src1 = enc.src12(OperandSlot::Src1, self.get('j'), self.get('k'), self.flag('c'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('q'), self.get('f'), self.flag('e'));
        inst.src1.data_type = load_type;
        inst.src2.data_type = load_type;
        if self.flag('v') && double {
            inst.src2.swizzle = SWIZZLE_XXXX;
        }
        if self.flag('r') {
            inst.src1.flags |= RegisterFlags::NEGATIVE;
        }

        inst.dest = Operand::new(OperandSlot::Dest);
        inst.dest.bank = RegisterBank::Predicate;
        inst.dest.num = self.get('n');
        inst.dest_mask = 0b0001;

        inst.detail = InstructionDetail::Test {
            alu_op,
            condition: TestCondition::from_fields(self.get('z'), self.get('i')),
            source_mask: 1 << channel,
        };
        inst
    }

    fn vtstmsk(&self) -> Instruction {
        let alu_sel = self.get('l');
        let Some((alu_op, load_type)) = self.test_op(alu_sel, self.get('g'), self.flag('e')) else {
            return self.illegal();
        };
        let store_type = match self.get('a') {
            0 => DataType::Uint8,
            1 => DataType::F16,
            2 => DataType::F32,
            _ => return self.illegal(),
        };
        // Write-disabled masks have no observable result
        if !self.flag('w') {
            return self.illegal();
        }

        let double = alu_sel == 0;
        let enc = self.enc(double, 8);

        let mut inst = self.inst(Opcode::Vtstmsk);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.repeat_count = self.get('u') as u8;
        inst.dest_mask = 0b1111;

        inst.src1 = enc.src12(OperandSlot::Src1, self.get('h'), self.get('n'), self.flag('r'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('j'), self.get('k'), self.flag('c'));
        inst.dest = enc.dest(self.get('f'), self.get('b'), self.flag('d'));
        inst.src1.data_type = load_type;
        inst.src2.data_type = load_type;
        inst.dest.data_type = store_type;
        if self.flag('v') {
            inst.src2.swizzle = SWIZZLE_XXXX;
        }
        if self.flag('t') {
            inst.src1.flags |= RegisterFlags::NEGATIVE;
        }

        inst.detail = InstructionDetail::Test {
            alu_op,
            condition: TestCondition::from_fields(self.get('z'), self.get('i')),
            source_mask: 0b1111,
        };
        inst
    }

    //=========================================================================
    // INTEGER AND BITWISE
    //=========================================================================

    fn vbw(&self) -> Instruction {
        let op2 = self.flag('a');
        let opcode = match (self.get('o'), op2) {
            (0b010, false) => Opcode::And,
            (0b010, true) => Opcode::Or,
            (0b011, _) => Opcode::Xor,
            (0b100, false) => Opcode::Shl,
            (0b100, true) => Opcode::Rol,
            (0b101, false) => Opcode::Shr,
            (0b101, true) => Opcode::Asr,
            _ => return self.illegal(),
        };
        let enc = self.enc(false, 7);

        let mut inst = self.inst(opcode);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.repeat_count = self.get('m') as u8;
        inst.dest_mask = 0b0001;

        inst.dest = enc.dest(self.get('j'), self.get('k'), self.flag('d'));
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('q'), self.get('f'), self.flag('c'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('u'), self.get('g'), self.flag('x'));
        for op in [&mut inst.dest, &mut inst.src1, &mut inst.src2] {
            op.data_type = DataType::Uint32;
        }

        let invert = self.flag('i');
        let immediate = (self.flag('x') && inst.src2.bank == RegisterBank::Immediate).then(|| {
            let value = self.get('u') | (self.get('l') << 7) | (self.get('h') << 14);
            if invert { !value } else { value }
        });

        inst.detail = InstructionDetail::Bitwise {
            immediate,
            invert: invert && immediate.is_none(),
            src2_rotate: self.get('t') as u8,
        };
        inst
    }

    //=========================================================================
    // TEXTURE
    //=========================================================================

    fn smp(&self) -> Instruction {
        const DEST_TYPES: [DataType; 4] = [DataType::F32, DataType::Unknown, DataType::F16, DataType::F32];
        let enc = self.enc(true, 7);

        let mut inst = self.inst(Opcode::Smp);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.dest_mask = 0b1111;

        inst.dest = Operand::new(OperandSlot::Dest);
        inst.dest.bank = if self.flag('t') {
            RegisterBank::PrimAttr
        } else {
            RegisterBank::Temp
        };
        inst.dest.num = self.get('o');
        inst.dest.data_type = DEST_TYPES[self.get('f') as usize & 3];

        inst.src0 = enc.src0(self.get('q'), self.get('k'), self.flag('r'));
        inst.src0.data_type = match self.get('g') {
            0 => DataType::F32,
            1 => DataType::F16,
            _ => DataType::C10,
        };
        inst.src1 = enc.src12(OperandSlot::Src1, self.get('u'), self.get('i'), self.flag('c'));
        inst.src2 = enc.src12(OperandSlot::Src2, self.get('v'), self.get('j'), self.flag('e'));

        inst.detail = InstructionDetail::Sample {
            dim: self.get('d') as u8 + 1,
            lod_mode: self.get('l') as u8,
            sb_mode: self.get('b') as u8,
        };
        inst
    }

    //=========================================================================
    // FLOW CONTROL
    //=========================================================================

    fn br(&self) -> Instruction {
        let raw = self.get('o');
        // 20-bit program counter: only a set bit 19 makes the offset negative
        let offset = if raw & (1 << 19) != 0 {
            (raw | 0xFFF0_0000) as i32
        } else {
            raw as i32
        };

        let mut inst = self.inst(Opcode::Br);
        inst.pred = ExtPredicate::from(self.get('p') as u8);
        inst.detail = InstructionDetail::Branch {
            offset,
            exception: self.flag('e'),
        };
        inst
    }

    fn smlsi(&self) -> Instruction {
        let mut inst = self.inst(Opcode::Smlsi);
        inst.detail = InstructionDetail::RepeatSetup {
            increments: [
                self.get('a') as u8,
                self.get('b') as u8,
                self.get('f') as u8,
                self.get('e') as u8,
            ],
            swizzle_mode: [self.flag('r'), self.flag('c'), self.flag('i'), self.flag('d')],
        };
        inst
    }

    fn kill(&self) -> Instruction {
        let mut inst = self.inst(Opcode::Kill);
        inst.pred = ShortPredicate::from(self.get('p') as u8).into();
        inst
    }
}

/// Predicate register written by a test instruction, if `word` is one
///
/// Reads the raw bits 34..36 of VTST and VTSTMSK so the analyzer can detect
/// writes without a full decode.
pub fn predicate_write(word: u64) -> Option<u8> {
    match word >> 59 {
        0b01001 | 0b01111 => Some(((word >> 34) & 3) as u8),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Place `value` into the bits named by `letter` of a family pattern
    pub(crate) fn encode(pattern: &str, values: &[(char, u64)]) -> u64 {
        let mut word = 0u64;
        let chars: Vec<char> = pattern.chars().collect();
        for (i, ch) in chars.iter().enumerate() {
            if *ch == '1' {
                word |= 1 << (63 - i);
            }
        }
        for &(letter, value) in values {
            let positions: Vec<usize> = chars
                .iter()
                .enumerate()
                .filter(|(_, c)| **c == letter)
                .map(|(i, _)| 63 - i)
                .collect();
            let len = positions.len();
            for (n, bit) in positions.iter().enumerate() {
                if (value >> (len - 1 - n)) & 1 != 0 {
                    word |= 1 << bit;
                }
            }
        }
        word
    }

    const VMOV: &str = "00111pppstrydecbmmaanoooiwwwwkllffgghhhhjjjjjjqqqqqquuuuuuvvvvvv";
    const BR: &str = "11111ppps000e-----wynba00r----------------iloooooooooooooooooooo";
    const VBW: &str = "01ooopppsnrydecxmmmmittttthhabkkffggjjjjjjjlllllllqqqqqqquuuuuuu";
    const VCOMP: &str = "00110pppsddyenr-aaaaobbccmmff-ttkk--ggggggg-------hhhhhhh---wwww";
    const VTST: &str = "01001ppps-oydrceavttiizzmhhhnnbbkkffgggggggwlluuuujjjjjjjqqqqqqq";

    #[test]
    fn test_illegal_word() {
        // 0b00111 with move type 3 is reserved
        let word = encode(VMOV, &[('m', 3)]);
        assert!(decode(word).is_illegal());
    }

    #[test]
    fn test_vmov_f32() {
        let word = encode(
            VMOV,
            &[
                ('o', 5),      // F32
                ('l', 1),      // dest bank O
                ('j', 0),      // o0
                ('f', 2),      // src1 bank PA
                ('u', 2),      // pa4
                ('w', 4),      // xyzw
                ('h', 0b1111), // mask
                ('a', 1),      // two iterations
            ],
        );
        let inst = decode(word);
        assert_eq!(inst.opcode, Opcode::Vmov);
        assert_eq!(inst.dest.bank, RegisterBank::Output);
        assert_eq!(inst.src1.bank, RegisterBank::PrimAttr);
        assert_eq!(inst.src1.num, 4);
        assert_eq!(inst.src1.swizzle, SWIZZLE_XYZW);
        assert_eq!(inst.dest_mask, 0b0011);
        assert_eq!(inst.iterations(), 2);
        assert!(matches!(
            inst.detail,
            InstructionDetail::Move {
                move_type: MoveType::Unconditional,
                ..
            }
        ));
    }

    #[test]
    fn test_vmov_conditional() {
        let word = encode(
            VMOV,
            &[('m', 1), ('o', 2), ('t', 1), ('i', 0), ('q', 3), ('v', 5), ('r', 1)],
        );
        let inst = decode(word);
        assert_eq!(inst.opcode, Opcode::Vmovc);
        assert_eq!(inst.src0.num, 3);
        assert_eq!(inst.src0.data_type, DataType::Int32);
        assert_eq!(inst.src2.num, 5);
        assert!(matches!(
            inst.detail,
            InstructionDetail::Move {
                compare: CompareMethod::LessThanZero,
                ..
            }
        ));
    }

    #[test]
    fn test_secondary_context() {
        let word = encode(VMOV, &[('o', 5), ('l', 0), ('j', 3)]);
        let inst = decode_with(word, DecodeContext { secondary_program: true });
        assert_eq!(inst.dest.bank, RegisterBank::SecAttr);
        assert_eq!(inst.dest.num, 6);
    }

    #[test]
    fn test_branch_offsets() {
        let forward = decode(encode(BR, &[('o', 5)]));
        assert_eq!(forward.opcode, Opcode::Br);
        assert!(matches!(forward.detail, InstructionDetail::Branch { offset: 5, .. }));

        let backward = decode(encode(BR, &[('o', 0xFFFFD), ('p', 1)]));
        assert_eq!(backward.pred, ExtPredicate::P0);
        assert!(matches!(backward.detail, InstructionDetail::Branch { offset: -3, .. }));
    }

    #[test]
    fn test_vbw_immediate() {
        let word = encode(
            VBW,
            &[('o', 0b010), ('a', 1), ('x', 1), ('g', 2), ('u', 0x7F), ('l', 1), ('i', 1)],
        );
        let inst = decode(word);
        assert_eq!(inst.opcode, Opcode::Or);
        let InstructionDetail::Bitwise { immediate, invert, .. } = inst.detail else {
            panic!("expected bitwise detail");
        };
        assert_eq!(immediate, Some(!0xFFu32));
        assert!(!invert);
    }

    #[test]
    fn test_vcomp_source_mask() {
        let word = encode(VCOMP, &[('b', 1), ('f', 2), ('w', 0b0001)]);
        let inst = decode(word);
        assert_eq!(inst.opcode, Opcode::Vrsq);
        assert!(matches!(
            inst.detail,
            InstructionDetail::Complex {
                op: ComplexOp::Rsq,
                source_mask: 0b0100
            }
        ));
    }

    #[test]
    fn test_predicate_write_families() {
        let bits = |major: u64, pred: u64| (major << 59) | (pred << 34);
        assert_eq!(predicate_write(bits(0b01001, 1)), Some(1));
        assert_eq!(predicate_write(bits(0b01111, 3)), Some(3));
        assert_eq!(predicate_write(bits(0b00111, 3)), None);
        assert_eq!(predicate_write(bits(0b01010, 2)), None);
    }

    #[test]
    fn test_vtst_predicate_dest() {
        let word = encode(
            VTST,
            &[('l', 1), ('u', 14), ('n', 2), ('h', 1), ('z', 1), ('i', 2)],
        );
        let inst = decode(word);
        assert_eq!(inst.opcode, Opcode::Vtst);
        assert_eq!(inst.dest.bank, RegisterBank::Predicate);
        assert_eq!(inst.dest.num, 2);
        assert_eq!(inst.src1.data_type, DataType::Int32);
        assert_eq!(predicate_write(word), Some(2));
        assert!(matches!(
            inst.detail,
            InstructionDetail::Test {
                alu_op: Opcode::Isub32,
                condition: TestCondition::GreaterEqual,
                source_mask: 0b0010
            }
        ));
    }

    #[test]
    fn test_decode_is_total() {
        // Walk a spread of words across every major opcode
        let mut state = 0x9E37_79B9_7F4A_7C15u64;
        for _ in 0..20_000 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let inst = decode(state);
            assert_eq!(inst.raw, state);
            let _ = decode_with(state, DecodeContext { secondary_program: true });
        }
    }
}
