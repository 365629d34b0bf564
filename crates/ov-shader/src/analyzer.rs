//! Control-flow analyzer
//!
//! Rebuilds structured control flow from the flat USSE instruction stream.
//! The program's predicated relative branches become a tree of code runs,
//! conditionals and loops, stored in an index arena.

use crate::usse::{decode, predicate_write, ExtPredicate, InstructionDetail, Opcode};
use ov_core::{Diagnostic, Diagnostics};
use std::collections::BTreeMap;
use std::fmt;

/// Index of a node in [`BlockTree::nodes`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// One node of the structured control-flow tree
///
/// Offset ranges are half-open instruction indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// Ordered children covering `[offset, end)`
    Block {
        offset: u32,
        end: u32,
        children: Vec<NodeId>,
    },
    /// Straight-line run sharing one predicate
    Code {
        offset: u32,
        size: u32,
        pred: ExtPredicate,
    },
    /// Body runs when the branch predicate `condition` is false
    Conditional {
        offset: u32,
        condition: ExtPredicate,
        merge: u32,
        if_block: NodeId,
        else_block: Option<NodeId>,
    },
    /// Repeats `content` until a break leaves it
    Loop {
        offset: u32,
        end: u32,
        content: NodeId,
    },
    Break {
        offset: u32,
        pred: ExtPredicate,
        /// Taken when the predicate is false
        negated: bool,
    },
    Continue {
        offset: u32,
        pred: ExtPredicate,
    },
}

/// A relative branch found by the pre-scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BranchInfo {
    pub origin: u32,
    pub dest: u32,
    pub pred: ExtPredicate,
}

impl BranchInfo {
    pub fn is_backward(&self) -> bool {
        self.dest <= self.origin
    }
}

/// Structured control flow of one program
#[derive(Debug, Clone)]
pub struct BlockTree {
    nodes: Vec<Node>,
    root: NodeId,
    length: u32,
    branches: Vec<BranchInfo>,
    diagnostics: Diagnostics,
}

impl BlockTree {
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0 as usize]
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Number of instructions the tree was built over
    pub fn length(&self) -> u32 {
        self.length
    }

    pub fn branches(&self) -> &[BranchInfo] {
        &self.branches
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }

    /// Children of a block node, empty for any other kind
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        match self.node(id) {
            Node::Block { children, .. } => children,
            _ => &[],
        }
    }

    /// Instruction range a node spans
    pub fn range(&self, id: NodeId) -> (u32, u32) {
        match *self.node(id) {
            Node::Block { offset, end, .. } => (offset, end),
            Node::Code { offset, size, .. } => (offset, offset + size),
            Node::Conditional { offset, merge, .. } => (offset, merge),
            Node::Loop { offset, end, .. } => (offset, end),
            Node::Break { offset, .. } | Node::Continue { offset, .. } => (offset, offset + 1),
        }
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: NodeId, depth: usize) -> fmt::Result {
        let indent = "  ".repeat(depth);
        match self.node(id) {
            Node::Block { children, .. } => {
                for child in children {
                    self.write_node(f, *child, depth)?;
                }
                Ok(())
            }
            Node::Code { offset, size, pred } => {
                writeln!(f, "{indent}code [{}, {}) {:?}", offset, offset + size, pred)
            }
            Node::Conditional {
                condition,
                merge,
                if_block,
                else_block,
                ..
            } => {
                writeln!(f, "{indent}if !{:?} (merge {})", condition, merge)?;
                self.write_node(f, *if_block, depth + 1)?;
                if let Some(else_block) = else_block {
                    writeln!(f, "{indent}else")?;
                    self.write_node(f, *else_block, depth + 1)?;
                }
                Ok(())
            }
            Node::Loop { end, content, .. } => {
                writeln!(f, "{indent}loop (end {})", end)?;
                self.write_node(f, *content, depth + 1)
            }
            Node::Break { pred, negated, .. } => {
                let neg = if *negated { "!" } else { "" };
                writeln!(f, "{indent}break {neg}{:?}", pred)
            }
            Node::Continue { pred, .. } => writeln!(f, "{indent}continue {:?}", pred),
        }
    }
}

impl fmt::Display for BlockTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_node(f, self.root, 0)
    }
}

//=============================================================================
// ANALYSIS
//=============================================================================

/// Per-offset facts gathered by the pre-scan
#[derive(Debug, Clone, Copy)]
struct Slot {
    pred: ExtPredicate,
    branch: Option<BranchInfo>,
    predicate_write: Option<u8>,
}

#[derive(Debug, Clone, Copy)]
struct LoopScope {
    start: u32,
    end: u32,
}

/// A range waiting to be structured into `block`
#[derive(Debug, Clone, Copy)]
struct Task {
    begin: u32,
    end: u32,
    block: NodeId,
    scope: Option<LoopScope>,
    /// The range is a loop body, so its first offset is not a new loop
    loop_body: bool,
}

#[derive(Debug, Clone, Copy)]
struct CodeRun {
    offset: u32,
    size: u32,
    pred: ExtPredicate,
}

struct Analyzer {
    slots: Vec<Slot>,
    length: u32,
    /// Backward branch origins keyed by destination
    backward: BTreeMap<u32, Vec<u32>>,
    nodes: Vec<Node>,
    diagnostics: Diagnostics,
}

/// Build the structured control-flow tree of the first `length` words
pub fn build_control_flow(code: &[u64], length: usize) -> BlockTree {
    let words = &code[..length.min(code.len())];
    let mut analyzer = Analyzer::new(words);

    let end = analyzer.length;
    let root = analyzer.push_block(0, end);
    let mut work = vec![Task {
        begin: 0,
        end,
        block: root,
        scope: None,
        loop_body: false,
    }];
    while let Some(task) = work.pop() {
        analyzer.run(task, &mut work);
    }

    let branches = analyzer.slots.iter().filter_map(|s| s.branch).collect();
    let tree = BlockTree {
        nodes: analyzer.nodes,
        root,
        length: end,
        branches,
        diagnostics: analyzer.diagnostics,
    };
    tracing::trace!("control flow:\n{}", tree);
    tree
}

impl Analyzer {
    fn new(words: &[u64]) -> Self {
        let length = words.len() as u32;
        let mut diagnostics = Diagnostics::new();
        let mut backward: BTreeMap<u32, Vec<u32>> = BTreeMap::new();

        let slots = words
            .iter()
            .enumerate()
            .map(|(offset, &word)| {
                let inst = decode(word);
                let branch = match (inst.opcode, inst.detail) {
                    (Opcode::Br, InstructionDetail::Branch { offset: rel, .. }) => {
                        let origin = offset as u32;
                        let target = offset as i64 + rel as i64;
                        let dest = if (0..=length as i64).contains(&target) {
                            target as u32
                        } else {
                            debug_assert!(false, "branch at {} leaves the program: {}", offset, target);
                            diagnostics.push(Diagnostic::error(
                                Some(offset),
                                format!("branch destination {} outside the program", target),
                            ));
                            diagnostics.mark_degraded();
                            length
                        };
                        let info = BranchInfo {
                            origin,
                            dest,
                            pred: inst.pred,
                        };
                        if info.is_backward() {
                            backward.entry(dest).or_default().push(origin);
                        }
                        Some(info)
                    }
                    _ => None,
                };
                Slot {
                    pred: inst.pred,
                    branch,
                    predicate_write: predicate_write(word),
                }
            })
            .collect();

        Self {
            slots,
            length,
            backward,
            nodes: Vec::new(),
            diagnostics,
        }
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    fn push_block(&mut self, offset: u32, end: u32) -> NodeId {
        self.push(Node::Block {
            offset,
            end,
            children: Vec::new(),
        })
    }

    fn append(&mut self, block: NodeId, child: NodeId) {
        if let Node::Block { children, .. } = &mut self.nodes[block.0 as usize] {
            children.push(child);
        }
    }

    fn flush(&mut self, run: &mut Option<CodeRun>, block: NodeId) {
        if let Some(run) = run.take() {
            let id = self.push(Node::Code {
                offset: run.offset,
                size: run.size,
                pred: run.pred,
            });
            self.append(block, id);
        }
    }

    /// Extend the current run with `offset`, splitting on a predicate change
    fn extend(&mut self, run: &mut Option<CodeRun>, block: NodeId, offset: u32, pred: ExtPredicate) {
        match run {
            Some(r) if r.pred == pred => r.size += 1,
            _ => {
                self.flush(run, block);
                *run = Some(CodeRun {
                    offset,
                    size: 1,
                    pred,
                });
            }
        }
    }

    /// Branches emit nothing and join whichever run is open
    fn extend_with_branch(&mut self, run: &mut Option<CodeRun>, block: NodeId, offset: u32) {
        match run {
            Some(r) => r.size += 1,
            None => self.extend(run, block, offset, ExtPredicate::None),
        }
    }

    /// End of the loop headed at `offset`, if one fits before `limit`
    ///
    /// The farthest unconditional backward branch closes the loop. A loop
    /// closed only by predicated branches is a do-while, and its farthest
    /// tail closes it instead.
    fn loop_end_at(&self, offset: u32, limit: u32) -> Option<u32> {
        let origins = self.backward.get(&offset)?;
        let fitting = || origins.iter().copied().filter(move |&origin| origin < limit);
        let unconditional = fitting()
            .filter(|&origin| {
                self.branch_at(origin)
                    .is_some_and(|br| br.pred == ExtPredicate::None)
            })
            .max();
        unconditional.or_else(|| fitting().max()).map(|origin| origin + 1)
    }

    fn branch_at(&self, offset: u32) -> Option<BranchInfo> {
        self.slots.get(offset as usize).and_then(|s| s.branch)
    }

    fn unstructured(&mut self, offset: u32, what: &str) {
        self.diagnostics
            .degrade(Some(offset as usize), format!("unstructured {} ignored", what));
    }

    fn run(&mut self, task: Task, work: &mut Vec<Task>) {
        let block = task.block;
        let mut run: Option<CodeRun> = None;
        let mut pc = task.begin;

        while pc < task.end {
            if !(task.loop_body && pc == task.begin) {
                if let Some(loop_end) = self.loop_end_at(pc, task.end) {
                    self.flush(&mut run, block);
                    let content = self.push_block(pc, loop_end);
                    let id = self.push(Node::Loop {
                        offset: pc,
                        end: loop_end,
                        content,
                    });
                    self.append(block, id);
                    work.push(Task {
                        begin: pc,
                        end: loop_end,
                        block: content,
                        scope: Some(LoopScope {
                            start: pc,
                            end: loop_end,
                        }),
                        loop_body: true,
                    });
                    pc = loop_end;
                    continue;
                }
            }

            let slot = self.slots[pc as usize];
            let Some(br) = slot.branch else {
                self.extend(&mut run, block, pc, slot.pred);
                if let (Some(reg), Some(r)) = (slot.predicate_write, run) {
                    // The rest of the run would see the new predicate value
                    if r.pred.aliases(reg) {
                        self.flush(&mut run, block);
                    }
                }
                pc += 1;
                continue;
            };

            if let Some(scope) = task.scope {
                if br.dest >= scope.end {
                    self.flush(&mut run, block);
                    let id = self.push(Node::Break {
                        offset: pc,
                        pred: br.pred,
                        negated: false,
                    });
                    self.append(block, id);
                    pc += 1;
                    continue;
                }
                if br.dest == scope.start {
                    let last = pc + 1 == scope.end;
                    if br.pred == ExtPredicate::None && last {
                        // Falling off the end repeats the loop
                        self.extend_with_branch(&mut run, block, pc);
                    } else {
                        self.flush(&mut run, block);
                        let node = if last {
                            Node::Break {
                                offset: pc,
                                pred: br.pred,
                                negated: true,
                            }
                        } else {
                            Node::Continue {
                                offset: pc,
                                pred: br.pred,
                            }
                        };
                        let id = self.push(node);
                        self.append(block, id);
                    }
                    pc += 1;
                    continue;
                }
            }

            if br.dest <= pc {
                self.unstructured(pc, "backward branch");
                self.extend_with_branch(&mut run, block, pc);
                pc += 1;
                continue;
            }

            if br.pred == ExtPredicate::None {
                // Splice: whatever lies between here and the target is unreachable
                self.extend_with_branch(&mut run, block, pc);
                self.flush(&mut run, block);
                pc = br.dest.min(task.end);
                continue;
            }

            if br.dest == pc + 1 {
                self.extend_with_branch(&mut run, block, pc);
                pc += 1;
                continue;
            }

            self.extend_with_branch(&mut run, block, pc);
            self.flush(&mut run, block);
            pc = self.conditional(task, pc, br, work);
        }

        self.flush(&mut run, block);
    }

    /// Structure a forward conditional branch, returning the merge offset
    fn conditional(&mut self, task: Task, origin: u32, br: BranchInfo, work: &mut Vec<Task>) -> u32 {
        let if_end = if br.dest > task.end {
            self.unstructured(origin, "branch out of its enclosing region");
            task.end
        } else {
            br.dest
        };

        // An unconditional jump closing the if body skips over an else body
        let else_end = self
            .branch_at(br.dest - 1)
            .filter(|pair| {
                br.dest < task.end
                    && pair.origin > origin
                    && pair.pred == ExtPredicate::None
                    && pair.dest > br.dest
                    && task.scope.is_none_or(|scope| pair.dest < scope.end)
            })
            .map(|pair| pair.dest.min(task.end));

        let if_block = self.push_block(origin + 1, if_end);
        work.push(Task {
            begin: origin + 1,
            end: if_end,
            block: if_block,
            scope: task.scope,
            loop_body: false,
        });

        let else_block = else_end.map(|end| {
            let block = self.push_block(if_end, end);
            work.push(Task {
                begin: if_end,
                end,
                block,
                scope: task.scope,
                loop_body: false,
            });
            block
        });

        let merge = else_end.unwrap_or(if_end);
        let id = self.push(Node::Conditional {
            offset: origin + 1,
            condition: br.pred,
            merge,
            if_block,
            else_block,
        });
        self.append(task.block, id);
        merge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOV: u64 = 0b00111 << 59;

    fn mov_if(pred: u64) -> u64 {
        MOV | (pred << 56)
    }

    fn branch(pred: u64, offset: i32) -> u64 {
        (0b11111u64 << 59) | (pred << 56) | (offset as u32 & 0xF_FFFF) as u64
    }

    fn kinds(tree: &BlockTree, block: NodeId) -> Vec<String> {
        tree.children(block)
            .iter()
            .map(|id| {
                let (start, end) = tree.range(*id);
                let kind = match tree.node(*id) {
                    Node::Block { .. } => "block",
                    Node::Code { .. } => "code",
                    Node::Conditional { .. } => "if",
                    Node::Loop { .. } => "loop",
                    Node::Break { .. } => "break",
                    Node::Continue { .. } => "continue",
                };
                format!("{kind}[{start},{end})")
            })
            .collect()
    }

    #[test]
    fn test_straight_line() {
        let code = vec![MOV; 5];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(kinds(&tree, tree.root()), vec!["code[0,5)"]);
        assert!(tree.branches().is_empty());
    }

    #[test]
    fn test_length_shorter_than_buffer() {
        let code = vec![MOV; 8];
        let tree = build_control_flow(&code, 3);
        assert_eq!(tree.length(), 3);
        assert_eq!(kinds(&tree, tree.root()), vec!["code[0,3)"]);
    }

    #[test]
    fn test_forward_conditional() {
        // 0 mov, 1 br p0 +3 -> 4, 2..3 body, 4..5 tail
        let code = vec![MOV, branch(1, 3), MOV, MOV, MOV, MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(
            kinds(&tree, tree.root()),
            vec!["code[0,2)", "if[2,4)", "code[4,6)"]
        );

        let cond = tree.children(tree.root())[1];
        let Node::Conditional {
            condition,
            if_block,
            else_block,
            merge,
            ..
        } = tree.node(cond).clone()
        else {
            panic!("expected conditional");
        };
        assert_eq!(condition, ExtPredicate::P0);
        assert_eq!(merge, 4);
        assert!(else_block.is_none());
        assert_eq!(kinds(&tree, if_block), vec!["code[2,4)"]);
    }

    #[test]
    fn test_if_else_pairing() {
        // 1: br p0 -> 4; 3: br -> 6 closes the if body; else is 4..5
        let code = vec![MOV, branch(1, 3), MOV, branch(0, 3), MOV, MOV, MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(
            kinds(&tree, tree.root()),
            vec!["code[0,2)", "if[2,6)", "code[6,7)"]
        );

        let cond = tree.children(tree.root())[1];
        let Node::Conditional {
            if_block,
            else_block: Some(else_block),
            ..
        } = tree.node(cond).clone()
        else {
            panic!("expected if/else");
        };
        assert_eq!(kinds(&tree, if_block), vec!["code[2,4)"]);
        assert_eq!(kinds(&tree, else_block), vec!["code[4,6)"]);
    }

    #[test]
    fn test_backward_loop() {
        // Loop body 2..4 closed by an unconditional branch back to 2
        let code = vec![MOV, MOV, MOV, MOV, branch(0, -2), MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(
            kinds(&tree, tree.root()),
            vec!["code[0,2)", "loop[2,5)", "code[5,6)"]
        );
        let Node::Loop { content, .. } = tree.node(tree.children(tree.root())[1]).clone() else {
            panic!("expected loop");
        };
        assert_eq!(kinds(&tree, content), vec!["code[2,5)"]);
    }

    #[test]
    fn test_loop_at_program_start() {
        let code = vec![MOV, branch(0, -1)];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(kinds(&tree, tree.root()), vec!["loop[0,2)"]);
    }

    #[test]
    fn test_loop_break_and_do_while() {
        // 0: mov, 1: br p1 -> 5 (break), 2: mov, 3: br p0 -> 0 (do-while)
        let code = vec![MOV, branch(2, 4), MOV, branch(1, -3), MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(kinds(&tree, tree.root()), vec!["loop[0,4)", "code[4,5)"]);

        let Node::Loop { content, .. } = tree.node(tree.children(tree.root())[0]).clone() else {
            panic!("expected loop");
        };
        assert_eq!(
            kinds(&tree, content),
            vec!["code[0,1)", "break[1,2)", "code[2,3)", "break[3,4)"]
        );
        let last = *tree.children(content).last().unwrap();
        assert_eq!(
            tree.node(last),
            &Node::Break {
                offset: 3,
                pred: ExtPredicate::P0,
                negated: true
            }
        );
    }

    #[test]
    fn test_unconditional_tail_closes_loop() {
        // 3: br -> 1 closes the loop even though 5: br p0 -> 1 lies farther out
        let code = vec![MOV, MOV, MOV, branch(0, -2), MOV, branch(1, -4), MOV];
        let tree = build_control_flow(&code, code.len());
        let root = kinds(&tree, tree.root());
        assert_eq!(root[0], "code[0,1)");
        assert_eq!(root[1], "loop[1,4)");
        // The far predicated tail cannot be nested in that loop
        assert!(tree.diagnostics().is_degraded());
    }

    #[test]
    fn test_continue_inside_loop() {
        let code = vec![MOV, branch(1, -1), MOV, branch(0, -3)];
        let tree = build_control_flow(&code, code.len());
        let Node::Loop { content, .. } = tree.node(tree.children(tree.root())[0]).clone() else {
            panic!("expected loop");
        };
        assert_eq!(
            kinds(&tree, content),
            vec!["code[0,1)", "continue[1,2)", "code[2,4)"]
        );
    }

    #[test]
    fn test_predicate_runs() {
        let code = vec![MOV, mov_if(1), mov_if(1), mov_if(2), MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(
            kinds(&tree, tree.root()),
            vec!["code[0,1)", "code[1,3)", "code[3,4)", "code[4,5)"]
        );
    }

    #[test]
    fn test_predicate_write_splits_run() {
        // vtst writing p0 under p0 ends the run even though the next predicate matches
        let vtst = (0b01001u64 << 59) | (1 << 56) | (1 << 18) | (12 << 14);
        let code = vec![mov_if(1), vtst, mov_if(1)];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(
            kinds(&tree, tree.root()),
            vec!["code[0,2)", "code[2,3)"]
        );
    }

    #[test]
    fn test_forward_splice_elides_dead_code() {
        let code = vec![MOV, branch(0, 3), MOV, MOV, MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(kinds(&tree, tree.root()), vec!["code[0,2)", "code[4,5)"]);
    }

    #[test]
    fn test_children_are_ordered_and_disjoint() {
        let code = vec![
            MOV,
            branch(1, 3),
            MOV,
            branch(0, 3),
            MOV,
            MOV,
            MOV,
            branch(0, -2),
            MOV,
        ];
        let tree = build_control_flow(&code, code.len());
        for (index, node) in tree.nodes().iter().enumerate() {
            if let Node::Block { offset, end, children } = node {
                let mut cursor = *offset;
                for child in children {
                    let (start, stop) = tree.range(*child);
                    assert!(start >= cursor, "node {} child overlaps", index);
                    assert!(stop <= *end);
                    cursor = stop;
                }
            }
            if let Node::Loop { offset, end, .. } = node {
                assert!(offset < end);
            }
        }
    }

    #[cfg(not(debug_assertions))]
    #[test]
    fn test_out_of_range_branch_is_clamped() {
        let code = vec![MOV, branch(1, 100), MOV];
        let tree = build_control_flow(&code, code.len());
        assert_eq!(tree.branches()[0].dest, 3);
        assert!(tree.diagnostics().is_degraded());
    }
}
