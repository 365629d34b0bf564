//! Block tree shapes and repeat stepping on encoded instruction streams

mod common;

use common::*;
use ov_shader::usse::{decode, ExtPredicate, Opcode, RepeatMode, RepeatSession};
use ov_shader::{build_control_flow, BlockTree, Node, NodeId};

const MOV: u64 = 0b00111 << 59;

fn shape(tree: &BlockTree, block: NodeId) -> Vec<(&'static str, u32, u32)> {
    tree.children(block)
        .iter()
        .map(|&id| {
            let (start, end) = tree.range(id);
            let kind = match tree.node(id) {
                Node::Block { .. } => "block",
                Node::Code { .. } => "code",
                Node::Conditional { .. } => "if",
                Node::Loop { .. } => "loop",
                Node::Break { .. } => "break",
                Node::Continue { .. } => "continue",
            };
            (kind, start, end)
        })
        .collect()
}

#[test]
fn test_branch_free_sequence() {
    for length in [1usize, 7, 40] {
        let code = vec![MOV; length];
        let tree = build_control_flow(&code, length);
        assert_eq!(shape(&tree, tree.root()), vec![("code", 0, length as u32)]);
    }
}

#[test]
fn test_single_forward_branch() {
    // origin 2, destination 5 over a 8 word program
    let mut code = vec![MOV; 8];
    code[2] = branch(1, 3);
    let tree = build_control_flow(&code, code.len());

    let root = shape(&tree, tree.root());
    // The branch word closes the leading code run
    assert_eq!(root[0], ("code", 0, 3));
    assert_eq!(root[1], ("if", 3, 5));
    assert_eq!(root[2], ("code", 5, 8));

    let Node::Conditional {
        condition,
        if_block,
        else_block,
        ..
    } = *tree.node(tree.children(tree.root())[1])
    else {
        panic!("expected a conditional");
    };
    assert_eq!(condition, ExtPredicate::P0);
    assert!(else_block.is_none());
    assert_eq!(shape(&tree, if_block), vec![("code", 3, 5)]);
}

#[test]
fn test_single_backward_branch() {
    // destination 2, origin 5
    let mut code = vec![MOV; 8];
    code[5] = branch(0, -3);
    let tree = build_control_flow(&code, code.len());

    let root = shape(&tree, tree.root());
    assert_eq!(root[0], ("code", 0, 2));
    assert_eq!(root[1], ("loop", 2, 6));
    assert_eq!(root[2], ("code", 6, 8));

    let Node::Loop { content, .. } = *tree.node(tree.children(tree.root())[1]) else {
        panic!("expected a loop");
    };
    let (start, _) = tree.range(content);
    assert_eq!(start, 2);
}

#[test]
fn test_repeat_external_offsets() {
    // vmad.rpt4 in external repeat mode writing a temp register
    let word = encode(VMAD, &[('i', 2), ('t', 3), ('k', 0), ('m', 4), ('w', 0b1111)]);
    let inst = decode(word);
    assert_eq!(inst.opcode, Opcode::Vmad);
    assert_eq!(inst.repeat_mode, RepeatMode::External);
    assert_eq!(inst.iterations(), 4);

    let session = RepeatSession::new();
    let base = inst.dest.num as i32;
    let registers: Vec<i32> = (0..inst.iterations())
        .map(|i| base + session.offset(&inst.dest, inst.repeat_mode, i))
        .collect();
    for (i, register) in registers.iter().enumerate() {
        assert_eq!(register - base, 4 * i as i32);
    }
}

#[test]
fn test_encoded_program_decodes_without_illegal_words() {
    let code = [mov_pa_to_o(0, 0), branch(1, 2), mov_pa_to_o(0, 4), mov_pa_to_o(4, 4)];
    for word in code {
        assert!(!decode(word).is_illegal(), "{:016x}", word);
    }
}
