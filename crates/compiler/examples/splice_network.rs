//! Splice and Recurrence: compiling two small networks
//!
//! Run with: cargo run --example splice_network
//!
//! This example demonstrates:
//! - Building a network with frame splicing and an affine component
//! - Compiling a forward request and printing the command list
//! - Compiling a recurrent network with derivatives requested

use nnet_compiler::{Compiler, CompilerConfig, ComputationRequest, IoSpecification};
use nnet_core::{ComponentInfo, Descriptor, ForwardingDescriptor, Nnet, SumDescriptor};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Splice and Recurrence ===\n");

    // -------------------------------------------------------------------------
    // Spliced Feed-Forward
    // -------------------------------------------------------------------------
    println!("1. Spliced Feed-Forward");
    println!("-----------------------");

    let mut nnet = Nnet::new();
    nnet.add_component("affine", ComponentInfo::affine(120, 64))?;
    nnet.add_component("relu", ComponentInfo::nonlinearity("RectifiedLinearComponent", 64))?;
    let input = nnet.add_input_node("input", 40)?;
    let spliced = Descriptor::new(vec![
        ForwardingDescriptor::offset(ForwardingDescriptor::node(input), -1).into(),
        ForwardingDescriptor::node(input).into(),
        ForwardingDescriptor::offset(ForwardingDescriptor::node(input), 1).into(),
    ])?;
    let affine = nnet.add_component_node("affine", "affine", spliced)?;
    let relu = nnet.add_component_node("relu", "relu", ForwardingDescriptor::node(affine))?;
    nnet.add_output_node("output", ForwardingDescriptor::node(relu))?;
    print!("{}", nnet);
    println!();

    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 2, -1..6))
        .with_output(IoSpecification::frames("output", 2, 0..5));
    let computation = Compiler::new(&nnet, CompilerConfig::default()).compile(&request)?;
    print!("{}", computation);
    println!();

    // -------------------------------------------------------------------------
    // Recurrent With Derivatives
    // -------------------------------------------------------------------------
    println!("2. Recurrent With Derivatives");
    println!("-----------------------------");

    let mut rnn = Nnet::new();
    rnn.add_component("rnn", ComponentInfo::affine(24, 8))?;
    let input = rnn.add_input_node("input", 16)?;
    // The component node comes right after its descriptor node.
    let rnn_id = rnn.num_nodes() + 1;
    let recurrent = Descriptor::new(vec![
        ForwardingDescriptor::node(input).into(),
        SumDescriptor::if_defined(ForwardingDescriptor::offset(
            ForwardingDescriptor::node(rnn_id),
            -1,
        )),
    ])?;
    let node = rnn.add_component_node("rnn", "rnn", recurrent)?;
    rnn.add_output_node("output", ForwardingDescriptor::node(node))?;

    let request = ComputationRequest::new()
        .with_input(IoSpecification::frames("input", 1, 0..4).with_deriv())
        .with_output(IoSpecification::frames("output", 1, 0..4).with_deriv())
        .with_model_derivative();
    let config = CompilerConfig::default().with_max_cindexes(10_000);
    let computation = Compiler::new(&rnn, config).compile(&request)?;
    println!(
        "{} matrices, {} submatrices, {} commands",
        computation.num_matrices(),
        computation.submatrices.len(),
        computation.commands.len()
    );
    print!("{}", computation);

    Ok(())
}
