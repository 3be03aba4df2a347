//! RV32I instruction decoding and disassembly rendering
//!
//! Everything in this module is a pure function of the 32-bit
//! instruction word (plus the fetch address, for instructions whose
//! canonical rendering shows an absolute branch or jump target). The
//! execution engine uses the same field extractors and immediates, so
//! the disassembly and the executed semantics cannot drift apart.
//!
//! Rendered mnemonics are padded right to [`MNEMONIC_WIDTH`] columns,
//! except ecall and ebreak which are emitted bare. Operands are joined
//! by commas with no spaces.

use crate::hex;
use crate::opcodes::*;
use crate::utils::{extract_field, sign_extend};

/// Column width of the mnemonic field in rendered instructions
pub const MNEMONIC_WIDTH: usize = 8;

pub fn get_opcode(insn: u32) -> u32 {
    extract_field(insn, 6, 0)
}

pub fn get_rd(insn: u32) -> u32 {
    extract_field(insn, 11, 7)
}

pub fn get_rs1(insn: u32) -> u32 {
    extract_field(insn, 19, 15)
}

pub fn get_rs2(insn: u32) -> u32 {
    extract_field(insn, 24, 20)
}

pub fn get_funct3(insn: u32) -> u32 {
    extract_field(insn, 14, 12)
}

pub fn get_funct7(insn: u32) -> u32 {
    extract_field(insn, 31, 25)
}

/// The CSR address occupies the top 12 bits of the instruction
pub fn get_csr(insn: u32) -> u32 {
    insn >> 20
}

/// I-type immediate: bits [31:20], sign-extended from bit 11
pub fn get_imm_i(insn: u32) -> i32 {
    sign_extend(extract_field(insn, 31, 20), 11) as i32
}

/// U-type immediate: bits [31:12] of the instruction in the upper 20
/// bits of the result, low 12 bits zero
pub fn get_imm_u(insn: u32) -> i32 {
    (insn & 0xffff_f000) as i32
}

/// S-type immediate: bits [31:25] over bits [11:7], sign-extended
/// from bit 11
pub fn get_imm_s(insn: u32) -> i32 {
    let imm = (extract_field(insn, 31, 25) << 5) | extract_field(insn, 11, 7);
    sign_extend(imm, 11) as i32
}

/// B-type immediate: 13-bit even offset, sign-extended from bit 12
pub fn get_imm_b(insn: u32) -> i32 {
    let imm = (extract_field(insn, 31, 31) << 12)
        | (extract_field(insn, 7, 7) << 11)
        | (extract_field(insn, 30, 25) << 5)
        | (extract_field(insn, 11, 8) << 1);
    sign_extend(imm, 12) as i32
}

/// J-type immediate: 21-bit even offset, sign-extended from bit 20
pub fn get_imm_j(insn: u32) -> i32 {
    let imm = (extract_field(insn, 31, 31) << 20)
        | (extract_field(insn, 19, 12) << 12)
        | (extract_field(insn, 20, 20) << 11)
        | (extract_field(insn, 30, 21) << 1);
    sign_extend(imm, 20) as i32
}

/// Fixed rendering for anything that does not decode
pub fn render_illegal_insn() -> String {
    "ERROR: UNIMPLEMENTED INSTRUCTION".to_string()
}

/// Pad a mnemonic right to the mnemonic column width. ecall and
/// ebreak are emitted without padding.
pub fn render_mnemonic(mnemonic: &str) -> String {
    if mnemonic == "ecall" || mnemonic == "ebreak" {
        return mnemonic.to_string();
    }
    format!("{mnemonic:<width$}", width = MNEMONIC_WIDTH)
}

pub fn render_reg(r: u32) -> String {
    format!("x{r}")
}

/// Base-plus-displacement memory operand, e.g. "-8(x5)"
pub fn render_base_disp(rs1: u32, imm: i32) -> String {
    format!("{imm}({})", render_reg(rs1))
}

pub fn render_lui(insn: u32) -> String {
    format!(
        "{}{},{}",
        render_mnemonic("lui"),
        render_reg(get_rd(insn)),
        hex::to_hex0x20((get_imm_u(insn) as u32) >> 12)
    )
}

pub fn render_auipc(insn: u32) -> String {
    format!(
        "{}{},{}",
        render_mnemonic("auipc"),
        render_reg(get_rd(insn)),
        hex::to_hex0x20((get_imm_u(insn) as u32) >> 12)
    )
}

/// jal renders the absolute target: the fetch address plus the J-type
/// immediate
pub fn render_jal(addr: u32, insn: u32) -> String {
    format!(
        "{}{},{}",
        render_mnemonic("jal"),
        render_reg(get_rd(insn)),
        hex::to_hex0x32(addr.wrapping_add(get_imm_j(insn) as u32))
    )
}

pub fn render_jalr(insn: u32) -> String {
    format!(
        "{}{},{}",
        render_mnemonic("jalr"),
        render_reg(get_rd(insn)),
        render_base_disp(get_rs1(insn), get_imm_i(insn))
    )
}

/// Conditional branches render the absolute target: the fetch address
/// plus the B-type immediate
pub fn render_btype(addr: u32, insn: u32, mnemonic: &str) -> String {
    format!(
        "{}{},{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rs1(insn)),
        render_reg(get_rs2(insn)),
        hex::to_hex0x32(addr.wrapping_add(get_imm_b(insn) as u32))
    )
}

pub fn render_itype_load(insn: u32, mnemonic: &str) -> String {
    format!(
        "{}{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rd(insn)),
        render_base_disp(get_rs1(insn), get_imm_i(insn))
    )
}

pub fn render_stype(insn: u32, mnemonic: &str) -> String {
    format!(
        "{}{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rs2(insn)),
        render_base_disp(get_rs1(insn), get_imm_s(insn))
    )
}

/// The imm argument is passed in so that the shift-immediate forms can
/// show only the 5-bit shift amount
pub fn render_itype_alu(insn: u32, mnemonic: &str, imm: i32) -> String {
    format!(
        "{}{},{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rd(insn)),
        render_reg(get_rs1(insn)),
        imm
    )
}

pub fn render_rtype(insn: u32, mnemonic: &str) -> String {
    format!(
        "{}{},{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rd(insn)),
        render_reg(get_rs1(insn)),
        render_reg(get_rs2(insn))
    )
}

/// CSR instructions with a register operand: csrrw, csrrs, csrrc
pub fn render_csrrx(insn: u32, mnemonic: &str) -> String {
    format!(
        "{}{},{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rd(insn)),
        hex::to_hex0x12(get_csr(insn)),
        render_reg(get_rs1(insn))
    )
}

/// CSR instructions with a zero-extended 5-bit immediate in the rs1
/// field: csrrwi, csrrsi, csrrci
pub fn render_csrrxi(insn: u32, mnemonic: &str) -> String {
    format!(
        "{}{},{},{}",
        render_mnemonic(mnemonic),
        render_reg(get_rd(insn)),
        hex::to_hex0x12(get_csr(insn)),
        get_rs1(insn)
    )
}

/// Disassemble one instruction word fetched from addr into its
/// canonical rendering
pub fn decode(addr: u32, insn: u32) -> String {
    match get_opcode(insn) {
        OP_LUI => render_lui(insn),
        OP_AUIPC => render_auipc(insn),
        OP_JAL => render_jal(addr, insn),
        OP_JALR => render_jalr(insn),

        OP_BRANCH => match get_funct3(insn) {
            FUNCT3_BEQ => render_btype(addr, insn, "beq"),
            FUNCT3_BNE => render_btype(addr, insn, "bne"),
            FUNCT3_BLT => render_btype(addr, insn, "blt"),
            FUNCT3_BGE => render_btype(addr, insn, "bge"),
            FUNCT3_BLTU => render_btype(addr, insn, "bltu"),
            FUNCT3_BGEU => render_btype(addr, insn, "bgeu"),
            _ => render_illegal_insn(),
        },

        OP_LOAD => match get_funct3(insn) {
            FUNCT3_B => render_itype_load(insn, "lb"),
            FUNCT3_H => render_itype_load(insn, "lh"),
            FUNCT3_W => render_itype_load(insn, "lw"),
            FUNCT3_BU => render_itype_load(insn, "lbu"),
            FUNCT3_HU => render_itype_load(insn, "lhu"),
            _ => render_illegal_insn(),
        },

        OP_STORE => match get_funct3(insn) {
            FUNCT3_B => render_stype(insn, "sb"),
            FUNCT3_H => render_stype(insn, "sh"),
            FUNCT3_W => render_stype(insn, "sw"),
            _ => render_illegal_insn(),
        },

        OP_IMM => match get_funct3(insn) {
            FUNCT3_ADDI => render_itype_alu(insn, "addi", get_imm_i(insn)),
            FUNCT3_SLTI => render_itype_alu(insn, "slti", get_imm_i(insn)),
            FUNCT3_SLTIU => render_itype_alu(insn, "sltiu", get_imm_i(insn)),
            FUNCT3_XORI => render_itype_alu(insn, "xori", get_imm_i(insn)),
            FUNCT3_ORI => render_itype_alu(insn, "ori", get_imm_i(insn)),
            FUNCT3_ANDI => render_itype_alu(insn, "andi", get_imm_i(insn)),
            FUNCT3_SLLI => {
                if get_funct7(insn) == FUNCT7_BASE {
                    render_itype_alu(insn, "slli", get_imm_i(insn) & 0x1f)
                } else {
                    render_illegal_insn()
                }
            }
            FUNCT3_SRLI => match get_funct7(insn) {
                FUNCT7_BASE => render_itype_alu(insn, "srli", get_imm_i(insn) & 0x1f),
                FUNCT7_SRA => render_itype_alu(insn, "srai", get_imm_i(insn) & 0x1f),
                _ => render_illegal_insn(),
            },
            _ => render_illegal_insn(),
        },

        OP => match get_funct3(insn) {
            FUNCT3_ADD => match get_funct7(insn) {
                FUNCT7_BASE => render_rtype(insn, "add"),
                FUNCT7_SUB => render_rtype(insn, "sub"),
                _ => render_illegal_insn(),
            },
            FUNCT3_SLL => render_rtype(insn, "sll"),
            FUNCT3_SLT => render_rtype(insn, "slt"),
            FUNCT3_SLTU => render_rtype(insn, "sltu"),
            FUNCT3_XOR => render_rtype(insn, "xor"),
            FUNCT3_SRL => match get_funct7(insn) {
                FUNCT7_BASE => render_rtype(insn, "srl"),
                FUNCT7_SRA => render_rtype(insn, "sra"),
                _ => render_illegal_insn(),
            },
            FUNCT3_OR => render_rtype(insn, "or"),
            FUNCT3_AND => render_rtype(insn, "and"),
            _ => render_illegal_insn(),
        },

        OP_SYSTEM => match get_funct3(insn) {
            FUNCT3_PRIV => match insn {
                INSN_ECALL => render_mnemonic("ecall"),
                INSN_EBREAK => render_mnemonic("ebreak"),
                _ => render_illegal_insn(),
            },
            FUNCT3_CSRRW => render_csrrx(insn, "csrrw"),
            FUNCT3_CSRRS => render_csrrx(insn, "csrrs"),
            FUNCT3_CSRRC => render_csrrx(insn, "csrrc"),
            FUNCT3_CSRRWI => render_csrrxi(insn, "csrrwi"),
            FUNCT3_CSRRSI => render_csrrxi(insn, "csrrsi"),
            FUNCT3_CSRRCI => render_csrrxi(insn, "csrrci"),
            _ => render_illegal_insn(),
        },

        _ => render_illegal_insn(),
    }
}
