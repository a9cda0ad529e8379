fn main() {
    match speechlink::device::list_inputs() {
        Ok(inputs) => println!("Available inputs:\n{}", inputs),
        Err(e) => eprintln!("{}", e),
    }

    match speechlink::device::list_outputs() {
        Ok(outputs) => println!("Available outputs:\n{}", outputs),
        Err(e) => eprintln!("{}", e),
    }
}
