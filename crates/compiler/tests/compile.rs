//! End-to-end compilation tests.
//!
//! Each test builds a small network, compiles a request against it and
//! inspects the graph or the command list.

use nnet_compiler::{
    compile, Command, CompileError, Compiler, CompilerConfig, ComputationGraphBuilder,
    ComputationRequest, IoSpecification, NnetComputation,
};
use nnet_core::{
    Axis, Cindex, Component, ComponentInfo, Descriptor, ForwardingDescriptor, Index, NetworkNode, Nnet,
    SumDescriptor,
};

// ============================================================================
// Networks
// ============================================================================

fn passthrough_nnet() -> Nnet {
    let mut nnet = Nnet::new();
    let input = nnet.add_input_node("input", 3).unwrap();
    nnet.add_output_node("output", ForwardingDescriptor::node(input))
        .unwrap();
    nnet
}

/// input(2) -> Append(Offset(input,-1), input, Offset(input,1)) -> affine(6->2) -> output
fn splice_nnet() -> Nnet {
    let mut nnet = Nnet::new();
    nnet.add_component("affine", ComponentInfo::affine(6, 2)).unwrap();
    let input = nnet.add_input_node("input", 2).unwrap();
    let desc = Descriptor::new(vec![
        ForwardingDescriptor::offset(ForwardingDescriptor::node(input), -1).into(),
        ForwardingDescriptor::node(input).into(),
        ForwardingDescriptor::offset(ForwardingDescriptor::node(input), 1).into(),
    ])
    .unwrap();
    let affine = nnet.add_component_node("affine", "affine", desc).unwrap();
    nnet.add_output_node("output", ForwardingDescriptor::node(affine))
        .unwrap();
    nnet
}

/// rnn(t) = affine(Append(input(t), IfDefined(rnn(t-1))))
fn rnn_nnet() -> Nnet {
    let mut nnet = Nnet::new();
    nnet.add_component("rnn", ComponentInfo::affine(4, 2)).unwrap();
    let input = nnet.add_input_node("input", 2).unwrap();
    let rnn_id = nnet.num_nodes() + 1;
    let desc = Descriptor::new(vec![
        ForwardingDescriptor::node(input).into(),
        SumDescriptor::if_defined(ForwardingDescriptor::offset(ForwardingDescriptor::node(rnn_id), -1)),
    ])
    .unwrap();
    let rnn = nnet.add_component_node("rnn", "rnn", desc).unwrap();
    nnet.add_output_node("output", ForwardingDescriptor::node(rnn))
        .unwrap();
    nnet
}

/// A component reading only itself, through the given descriptor.
fn self_loop_nnet(make: impl Fn(usize) -> Descriptor) -> Nnet {
    let mut nnet = Nnet::new();
    nnet.add_component("loop", ComponentInfo::affine(2, 2)).unwrap();
    let id = nnet.num_nodes() + 1;
    let node = nnet.add_component_node("loop", "loop", make(id)).unwrap();
    nnet.add_output_node("output", ForwardingDescriptor::node(node))
        .unwrap();
    nnet
}

/// Inputs `a` and `b` of equal dim feeding an output through `make(a, b)`.
fn two_input_nnet(make: impl Fn(usize, usize) -> Descriptor) -> Nnet {
    let mut nnet = Nnet::new();
    let a = nnet.add_input_node("a", 2).unwrap();
    let b = nnet.add_input_node("b", 2).unwrap();
    nnet.add_output_node("output", make(a, b)).unwrap();
    nnet
}

/// An input of dim 2 read by the output through one forwarding descriptor.
fn forwarding_nnet(make: impl Fn(ForwardingDescriptor) -> ForwardingDescriptor) -> Nnet {
    let mut nnet = Nnet::new();
    let input = nnet.add_input_node("input", 2).unwrap();
    nnet.add_output_node("output", make(ForwardingDescriptor::node(input)))
        .unwrap();
    nnet
}

fn frames_request(inputs: std::ops::Range<i32>, outputs: std::ops::Range<i32>) -> ComputationRequest {
    ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, inputs))
        .with_output(IoSpecification::frames("output", 1, outputs))
}

fn count(computation: &NnetComputation, pred: impl Fn(&Command) -> bool) -> usize {
    computation.count_commands(pred)
}

fn without_deallocs(computation: &NnetComputation) -> Vec<Command> {
    computation
        .commands
        .iter()
        .filter(|c| !matches!(c, Command::DeallocMatrix { .. }))
        .cloned()
        .collect()
}

// ============================================================================
// Passthrough
// ============================================================================

#[test]
fn test_passthrough_graph() {
    let nnet = passthrough_nnet();
    let request = frames_request(0..1, 0..1);
    let graph = ComputationGraphBuilder::new(&nnet, &request, &CompilerConfig::default())
        .build()
        .unwrap();
    assert_eq!(graph.num_cindexes(), 2);
    assert_eq!(graph.num_kept(), 2);
    let output = graph
        .get_cindex_id(&Cindex::new(1, Index::at(0, 0)))
        .unwrap();
    let input = graph
        .get_cindex_id(&Cindex::new(0, Index::at(0, 0)))
        .unwrap();
    assert_eq!(graph.dependencies(output), &[input]);
    assert!(graph.is_input(input));
}

#[test]
fn test_passthrough_commands() {
    let computation = compile(&passthrough_nnet(), &frames_request(0..1, 0..1)).unwrap();
    assert_eq!(computation.num_matrices(), 2);
    assert_eq!(
        computation.commands,
        vec![
            Command::AllocMatrixUndefined { matrix: 0 },
            Command::AcceptInput { submatrix: 0, node: 0 },
            Command::AllocMatrixZeroed { matrix: 1 },
            Command::MatrixCopy { dst: 1, src: 0 },
            Command::DeallocMatrix { matrix: 0 },
            Command::ProvideOutput { submatrix: 1, node: 1 },
            Command::DeallocMatrix { matrix: 1 },
        ]
    );
    assert_eq!(count(&computation, |c| matches!(c, Command::Propagate { .. })), 0);
}

// ============================================================================
// Splicing
// ============================================================================

#[test]
fn test_splice_lowering() {
    let computation = compile(&splice_nnet(), &frames_request(-1..3, 0..2)).unwrap();
    // input, affine_input, affine, output
    assert_eq!(computation.num_matrices(), 4);
    assert_eq!(count(&computation, |c| matches!(c, Command::CopyRows { .. })), 3);
    assert_eq!(count(&computation, |c| matches!(c, Command::Propagate { .. })), 1);
    assert_eq!(count(&computation, |c| matches!(c, Command::MatrixCopy { .. })), 1);
    assert_eq!(computation.indexes[0], vec![Some(0), Some(1)]);
    assert_eq!(computation.indexes[1], vec![Some(1), Some(2)]);
    assert_eq!(computation.indexes[2], vec![Some(2), Some(3)]);
    assert!(computation.check().is_ok());
}

#[test]
fn test_splice_without_context_is_unsatisfiable() {
    let err = compile(&splice_nnet(), &frames_request(0..2, 0..2)).unwrap_err();
    assert_eq!(
        err,
        CompileError::Unsatisfiable {
            node: "output".to_string(),
            index: Index::at(0, 0),
        }
    );
}

#[test]
fn test_splice_two_sequences() {
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 2, -1..4))
        .with_output(IoSpecification::frames("output", 2, 0..3));
    let computation = compile(&splice_nnet(), &request).unwrap();
    assert_eq!(computation.matrices[1].num_rows, 6);
    assert_eq!(computation.matrices[1].num_cols, 6);
    assert!(computation.check().is_ok());
}

// ============================================================================
// Recurrence
// ============================================================================

#[test]
fn test_recurrent_network_is_finite() {
    let config = CompilerConfig::default().with_max_cindexes(100);
    let computation = Compiler::new(&rnn_nnet(), config)
        .compile(&frames_request(0..3, 0..3))
        .unwrap();
    assert_eq!(count(&computation, |c| matches!(c, Command::Propagate { .. })), 3);
    // input, 3 x rnn_input, 3 x rnn, output
    assert_eq!(computation.num_matrices(), 8);
    // The output gathers one row from each time step's matrix.
    assert_eq!(count(&computation, |c| matches!(c, Command::CopyRowsMulti { .. })), 1);
    // Recurrent part: nothing at t=0, a straight copy at t=1 and t=2.
    assert_eq!(count(&computation, |c| matches!(c, Command::MatrixCopy { .. })), 2);
    assert_eq!(count(&computation, |c| matches!(c, Command::CopyRows { .. })), 3);
}

#[test]
fn test_propagates_run_in_time_order() {
    let computation = compile(&rnn_nnet(), &frames_request(0..3, 0..3)).unwrap();
    let outputs: Vec<usize> = computation
        .commands
        .iter()
        .filter_map(|c| match c {
            Command::Propagate { output, .. } => Some(computation.submatrices[*output].matrix),
            _ => None,
        })
        .collect();
    let times: Vec<i32> = outputs
        .iter()
        .map(|&m| computation.matrix_debug_info[m].cindexes[0].index.t)
        .collect();
    assert_eq!(times, vec![0, 1, 2]);
}

#[test]
fn test_unbounded_recurrence_hits_cap() {
    let nnet = self_loop_nnet(|id| {
        SumDescriptor::if_defined(ForwardingDescriptor::offset(ForwardingDescriptor::node(id), -1)).into()
    });
    let request =
        ComputationRequest::new().with_output(IoSpecification::frames("output", 1, 0..1));
    let config = CompilerConfig::default().with_max_cindexes(1000);
    let err = Compiler::new(&nnet, config).compile(&request).unwrap_err();
    assert_eq!(err, CompileError::RunawayExpansion { limit: 1000 });
}

#[test]
fn test_fixed_index_self_reference_is_cyclic() {
    let nnet = self_loop_nnet(|id| ForwardingDescriptor::node(id).into());
    let request =
        ComputationRequest::new().with_output(IoSpecification::frames("output", 1, 0..1));
    let err = compile(&nnet, &request).unwrap_err();
    assert_eq!(
        err,
        CompileError::CyclicDependency {
            node: "loop".to_string(),
            index: Index::at(0, 0),
        }
    );
}

#[test]
fn test_optional_fixed_index_self_reference_is_cyclic() {
    let nnet = self_loop_nnet(|id| SumDescriptor::if_defined(ForwardingDescriptor::node(id)).into());
    let request =
        ComputationRequest::new().with_output(IoSpecification::frames("output", 1, 0..1));
    assert!(matches!(
        compile(&nnet, &request),
        Err(CompileError::CyclicDependency { .. })
    ));
}

// ============================================================================
// Graph Invariants
// ============================================================================

/// Every kept id is reachable from a requested output, reads only kept ids,
/// and is computable from kept ids alone.
fn assert_kept_ids_are_sound(nnet: &Nnet, request: &ComputationRequest) {
    let graph = ComputationGraphBuilder::new(nnet, request, &CompilerConfig::default())
        .build()
        .unwrap();
    let output = nnet.get_node_index("output").unwrap();

    let mut reached = vec![false; graph.num_cindexes()];
    let mut queue: Vec<usize> = graph
        .kept_ids()
        .filter(|&id| graph.cindex(id).node == output)
        .collect();
    assert_eq!(queue.len(), request.output("output").unwrap().indexes.len());
    while let Some(id) = queue.pop() {
        if std::mem::replace(&mut reached[id], true) {
            continue;
        }
        queue.extend_from_slice(graph.dependencies(id));
    }

    let kept = |c: &Cindex| graph.is_kept_cindex(c);
    for id in graph.kept_ids() {
        let cindex = graph.cindex(id);
        assert!(reached[id], "{} kept but unreachable", cindex);
        assert!(graph.dependencies(id).iter().all(|&dep| graph.is_kept(dep)));
        let computable = match nnet.node(cindex.node) {
            NetworkNode::Input { .. } => graph.is_input(id),
            NetworkNode::Descriptor(desc) => desc.is_computable(&cindex.index, &kept).is_some(),
            NetworkNode::Component { component } => nnet
                .component(*component)
                .is_computable(&cindex.index, &|i| kept(&Cindex::new(cindex.node - 1, *i)))
                .is_some(),
            NetworkNode::DimRange { node, .. } => kept(&Cindex::new(*node, cindex.index)),
        };
        assert!(computable, "{} kept but not computable", cindex);
    }
    for id in 0..graph.num_cindexes() {
        assert_eq!(reached[id], graph.is_kept(id), "{}", graph.cindex(id));
    }
    assert!(graph.num_kept() < graph.num_cindexes());
}

#[test]
fn test_kept_ids_reachable_and_computable() {
    // Inputs at t=-2 and t=3 are never read.
    assert_kept_ids_are_sound(&splice_nnet(), &frames_request(-2..4, 0..2));
    // rnn(-1) is encountered but has no input to read.
    assert_kept_ids_are_sound(&rnn_nnet(), &frames_request(0..3, 0..3));
}

// ============================================================================
// Glue Selection
// ============================================================================

#[test]
fn test_failover_picks_available_rows() {
    let mut nnet = Nnet::new();
    let input = nnet.add_input_node("input", 3).unwrap();
    nnet.add_output_node(
        "output",
        SumDescriptor::failover(
            ForwardingDescriptor::offset(ForwardingDescriptor::node(input), 1),
            ForwardingDescriptor::node(input),
        ),
    )
    .unwrap();
    let computation = compile(&nnet, &frames_request(0..2, 0..2)).unwrap();
    // output(0) reads input(1); output(1) has no input(2) and falls back to input(1).
    assert_eq!(
        without_deallocs(&computation)[3],
        Command::CopyRows { dst: 1, src: 0, indexes: 0 }
    );
    assert_eq!(computation.indexes[0], vec![Some(1), Some(1)]);
}

#[test]
fn test_sum_copies_then_adds() {
    let mut nnet = Nnet::new();
    let a = nnet.add_input_node("a", 4).unwrap();
    let b = nnet.add_input_node("b", 4).unwrap();
    nnet.add_output_node(
        "output",
        SumDescriptor::sum(ForwardingDescriptor::node(a), ForwardingDescriptor::node(b)),
    )
    .unwrap();
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("a", 1, 0..2))
        .with_input(IoSpecification::frames("b", 1, 0..2))
        .with_output(IoSpecification::frames("output", 1, 0..2));
    let computation = compile(&nnet, &request).unwrap();
    let glue: Vec<Command> = without_deallocs(&computation)
        .into_iter()
        .filter(|c| matches!(c, Command::MatrixCopy { .. } | Command::MatrixAdd { .. }))
        .collect();
    assert_eq!(glue.len(), 2);
    assert!(matches!(glue[0], Command::MatrixCopy { .. }));
    assert!(matches!(glue[1], Command::MatrixAdd { .. }));
}

#[test]
fn test_dim_range_is_a_view() {
    let mut nnet = Nnet::new();
    nnet.add_input_node("input", 30).unwrap();
    let tail = nnet.add_dim_range_node("tail", "input", 10, 20).unwrap();
    nnet.add_output_node("output", ForwardingDescriptor::node(tail))
        .unwrap();
    let computation = compile(&nnet, &frames_request(0..3, 0..3)).unwrap();
    assert_eq!(computation.num_matrices(), 2);
    let Some(Command::MatrixCopy { src, .. }) = computation
        .commands
        .iter()
        .find(|c| matches!(c, Command::MatrixCopy { .. }))
    else {
        panic!("expected a MatrixCopy");
    };
    let view = computation.submatrices[*src];
    assert_eq!((view.matrix, view.col_offset, view.num_cols), (0, 10, 20));
}

#[test]
fn test_switch_gathers_from_both_inputs() {
    let nnet = two_input_nnet(|a, b| {
        ForwardingDescriptor::switch(vec![ForwardingDescriptor::node(a), ForwardingDescriptor::node(b)])
            .unwrap()
            .into()
    });
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("a", 1, 0..4))
        .with_input(IoSpecification::frames("b", 1, 0..4))
        .with_output(IoSpecification::frames("output", 1, 0..4));
    let computation = compile(&nnet, &request).unwrap();
    // Even t reads a (submatrix 0), odd t reads b (submatrix 1).
    assert_eq!(
        computation.indexes_multi[0],
        vec![Some((0, 0)), Some((1, 1)), Some((0, 2)), Some((1, 3))]
    );
    assert_eq!(
        count(&computation, |c| matches!(c, Command::CopyRowsMulti { indexes_multi: 0, .. })),
        1
    );
    assert!(computation.check().is_ok());
}

#[test]
fn test_round_repeats_source_rows() {
    let nnet = forwarding_nnet(|input| ForwardingDescriptor::round(input, 2).unwrap());
    let computation = compile(&nnet, &frames_request(0..4, 0..4)).unwrap();
    assert_eq!(computation.indexes[0], vec![Some(0), Some(0), Some(2), Some(2)]);
    assert!(without_deallocs(&computation).contains(&Command::CopyRows {
        dst: 1,
        src: 0,
        indexes: 0
    }));
    assert!(computation.check().is_ok());
}

#[test]
fn test_replace_index_reads_one_row() {
    let nnet = forwarding_nnet(|input| ForwardingDescriptor::replace_index(input, Axis::T, 0));
    let computation = compile(&nnet, &frames_request(0..3, 0..3)).unwrap();
    assert_eq!(computation.indexes[0], vec![Some(0), Some(0), Some(0)]);
    assert_eq!(count(&computation, |c| matches!(c, Command::CopyRows { .. })), 1);
    assert!(computation.check().is_ok());
}

// ============================================================================
// Backprop
// ============================================================================

#[test]
fn test_backprop_mirrors_forward() {
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, -1..3).with_deriv())
        .with_output(IoSpecification::frames("output", 1, 0..2).with_deriv());
    let computation = compile(&splice_nnet(), &request).unwrap();
    assert_eq!(computation.num_matrices(), 8);
    assert_eq!(count(&computation, |c| matches!(c, Command::AcceptOutputDeriv { .. })), 1);
    assert_eq!(count(&computation, |c| matches!(c, Command::MatrixAdd { .. })), 1);
    assert_eq!(count(&computation, |c| matches!(c, Command::AddToRows { .. })), 3);
    assert_eq!(count(&computation, |c| matches!(c, Command::ProvideInputDeriv { .. })), 1);

    let forward: Vec<usize> = computation
        .commands
        .iter()
        .filter_map(|c| match c {
            Command::CopyRows { indexes, .. } => Some(*indexes),
            _ => None,
        })
        .collect();
    let mut backward: Vec<usize> = computation
        .commands
        .iter()
        .filter_map(|c| match c {
            Command::AddToRows { indexes, .. } => Some(*indexes),
            _ => None,
        })
        .collect();
    backward.reverse();
    assert_eq!(forward, backward);

    let backprop = computation
        .commands
        .iter()
        .find(|c| matches!(c, Command::Backprop { .. }))
        .unwrap();
    assert!(matches!(
        backprop,
        Command::Backprop {
            input_value: Some(_),
            output_value: None,
            input_deriv: Some(_),
            update: false,
            ..
        }
    ));
    assert!(computation.check().is_ok());
}

#[test]
fn test_model_derivative_only() {
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, -1..3))
        .with_output(IoSpecification::frames("output", 1, 0..2).with_deriv())
        .with_model_derivative();
    let computation = compile(&splice_nnet(), &request).unwrap();
    assert_eq!(count(&computation, |c| matches!(c, Command::AddToRows { .. })), 0);
    assert_eq!(count(&computation, |c| matches!(c, Command::ProvideInputDeriv { .. })), 0);
    let backprops: Vec<&Command> = computation
        .commands
        .iter()
        .filter(|c| matches!(c, Command::Backprop { .. }))
        .collect();
    assert_eq!(backprops.len(), 1);
    assert!(matches!(
        backprops[0],
        Command::Backprop {
            input_deriv: None,
            update: true,
            ..
        }
    ));
    assert!(computation.need_model_derivative);
}

#[test]
fn test_recurrent_backprop_checks() {
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 2, 0..4).with_deriv())
        .with_output(IoSpecification::frames("output", 2, 0..4).with_deriv())
        .with_model_derivative();
    let computation = compile(&rnn_nnet(), &request).unwrap();
    assert_eq!(count(&computation, |c| matches!(c, Command::Backprop { .. })), 4);
    assert_eq!(count(&computation, |c| matches!(c, Command::AddToRowsMulti { .. })), 1);
    assert!(computation.check().is_ok());
}

#[test]
fn test_switch_backprop_scatters_to_both_inputs() {
    let nnet = two_input_nnet(|a, b| {
        ForwardingDescriptor::switch(vec![ForwardingDescriptor::node(a), ForwardingDescriptor::node(b)])
            .unwrap()
            .into()
    });
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("a", 1, 0..4).with_deriv())
        .with_input(IoSpecification::frames("b", 1, 0..4).with_deriv())
        .with_output(IoSpecification::frames("output", 1, 0..4).with_deriv());
    let computation = compile(&nnet, &request).unwrap();
    assert_eq!(count(&computation, |c| matches!(c, Command::ProvideInputDeriv { .. })), 2);

    let Some(&Command::AddToRowsMulti { src, indexes_multi }) = computation
        .commands
        .iter()
        .find(|c| matches!(c, Command::AddToRowsMulti { .. }))
    else {
        panic!("expected an AddToRowsMulti");
    };
    let debug = &computation.matrix_debug_info;
    let src_matrix = computation.submatrices[src].matrix;
    assert!(debug[src_matrix].is_deriv);
    assert_eq!(debug[src_matrix].node, nnet.get_node_index("output").unwrap());

    let forward = &computation.indexes_multi[0];
    let backward = &computation.indexes_multi[indexes_multi];
    assert_eq!(forward.len(), backward.len());
    for (fwd, bwd) in forward.iter().zip(backward) {
        let ((fwd_sub, fwd_row), (bwd_sub, bwd_row)) = (fwd.unwrap(), bwd.unwrap());
        let fwd_matrix = computation.submatrices[fwd_sub].matrix;
        let bwd_matrix = computation.submatrices[bwd_sub].matrix;
        assert_eq!(fwd_row, bwd_row);
        assert!(!debug[fwd_matrix].is_deriv);
        assert!(debug[bwd_matrix].is_deriv);
        assert_eq!(debug[fwd_matrix].node, debug[bwd_matrix].node);
    }
    assert!(computation.check().is_ok());
}

// ============================================================================
// Requests, Determinism, Output
// ============================================================================

#[test]
fn test_unknown_node_fails_before_graph() {
    let request = ComputationRequest::new().with_output(IoSpecification::frames("nope", 1, 0..1));
    assert_eq!(
        compile(&splice_nnet(), &request).unwrap_err(),
        CompileError::UnknownNode {
            name: "nope".to_string()
        }
    );
}

#[test]
fn test_invalid_network_is_reported() {
    let mut nnet = Nnet::new();
    nnet.add_output_node("output", ForwardingDescriptor::node(9))
        .unwrap();
    let request = ComputationRequest::new().with_output(IoSpecification::frames("output", 1, 0..1));
    assert!(matches!(
        compile(&nnet, &request),
        Err(CompileError::Network(_))
    ));
}

#[test]
fn test_index_overflow_is_an_invalid_request() {
    let nnet = forwarding_nnet(|input| ForwardingDescriptor::round(input, 3).unwrap());
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, 0..1))
        .with_output(IoSpecification::new("output", vec![Index::at(0, i32::MIN)]));
    assert!(matches!(
        compile(&nnet, &request),
        Err(CompileError::InvalidRequest { .. })
    ));

    let nnet = forwarding_nnet(|input| ForwardingDescriptor::offset(input, 1));
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, 0..1))
        .with_output(IoSpecification::new("output", vec![Index::at(0, i32::MAX)]));
    assert!(matches!(
        compile(&nnet, &request),
        Err(CompileError::InvalidRequest { .. })
    ));

    // Reached through a component: output -> affine -> spliced input.
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, -1..3))
        .with_output(IoSpecification::new("output", vec![Index::at(0, i32::MAX)]));
    assert!(matches!(
        compile(&splice_nnet(), &request),
        Err(CompileError::InvalidRequest { .. })
    ));
}

#[test]
fn test_input_deriv_without_output_deriv_is_rejected() {
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, -1..3).with_deriv())
        .with_output(IoSpecification::frames("output", 1, 0..2));
    assert!(matches!(
        compile(&splice_nnet(), &request),
        Err(CompileError::InvalidRequest { .. })
    ));
}

#[test]
fn test_inputs_accepted_in_request_order() {
    let nnet = two_input_nnet(|a, b| {
        SumDescriptor::sum(ForwardingDescriptor::node(a), ForwardingDescriptor::node(b)).into()
    });
    let (a, b) = (nnet.get_node_index("a").unwrap(), nnet.get_node_index("b").unwrap());
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("b", 1, 0..2))
        .with_input(IoSpecification::frames("a", 1, 0..2))
        .with_output(IoSpecification::frames("output", 1, 0..2));
    let computation = compile(&nnet, &request).unwrap();
    assert_eq!(
        without_deallocs(&computation)[..4],
        [
            Command::AllocMatrixUndefined { matrix: 0 },
            Command::AcceptInput { submatrix: 0, node: b },
            Command::AllocMatrixUndefined { matrix: 1 },
            Command::AcceptInput { submatrix: 1, node: a },
        ]
    );
    assert_eq!(computation.matrix_debug_info[0].node, b);
}

#[test]
fn test_compilation_is_deterministic() {
    let nnet = rnn_nnet();
    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 3, 0..5))
        .with_output(IoSpecification::frames("output", 3, 0..5));
    let first = compile(&nnet, &request).unwrap();
    for _ in 0..5 {
        assert_eq!(compile(&nnet, &request).unwrap(), first);
    }

    let config = CompilerConfig::default();
    let g1 = ComputationGraphBuilder::new(&nnet, &request, &config).build().unwrap();
    let g2 = ComputationGraphBuilder::new(&nnet, &request, &config).build().unwrap();
    assert_eq!(g1.cindexes(), g2.cindexes());
    assert_eq!(g1.topological_order(), g2.topological_order());
}

#[test]
fn test_debug_info_and_display() {
    let computation = compile(&splice_nnet(), &frames_request(-1..3, 0..2)).unwrap();
    assert_eq!(computation.matrix_debug_info.len(), computation.num_matrices());
    assert_eq!(computation.matrix_debug_info[0].cindexes.len(), 4);
    let text = computation.to_string();
    assert!(text.contains("# m0: 4 x 2 input[ (0, -1:2) ]"));
    assert!(text.contains("propagate"));

    let quiet = Compiler::new(&splice_nnet(), CompilerConfig::default().with_debug_info(false))
        .compile(&frames_request(-1..3, 0..2))
        .unwrap();
    assert!(quiet.matrix_debug_info.is_empty());
    assert!(quiet.node_names.is_empty());
}

#[test]
fn test_computation_serializes() {
    let computation = compile(&passthrough_nnet(), &frames_request(0..1, 0..1)).unwrap();
    let json = serde_json::to_string(&computation).unwrap();
    assert!(json.contains(r#""op":"accept_input""#));
    let back: NnetComputation = serde_json::from_str(&json).unwrap();
    assert_eq!(back, computation);
}
