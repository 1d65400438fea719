use state_machines::state_machine;

state_machine! {
    name: TaggingMachine,
    state: TaggingState,
    initial: Initializing,
    states: [Initializing, Processing, GeneratingCsv, Done, Cancelled, Failed],
    events {
        begin { transition: { from: Initializing, to: Processing } }
        generate_csv { transition: { from: Processing, to: GeneratingCsv } }
        finish { transition: { from: GeneratingCsv, to: Done } }
        cancel {
            transition: { from: Initializing, to: Cancelled }
            transition: { from: Processing, to: Cancelled }
            transition: { from: GeneratingCsv, to: Cancelled }
        }
        fail {
            transition: { from: Initializing, to: Failed }
            transition: { from: Processing, to: Failed }
            transition: { from: GeneratingCsv, to: Failed }
        }
    }
}

pub fn ready() -> TaggingMachine<(), Initializing> {
    TaggingMachine::new(())
}
