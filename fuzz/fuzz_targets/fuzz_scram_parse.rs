#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use mongo_producer::auth::scram::ServerFirst;
use mongo_producer::auth::ScramClient;

#[derive(Debug, Arbitrary)]
struct Exchange {
    username: String,
    password: String,
    server_first: String,
    server_final: String,
}

fuzz_target!(|input: Exchange| {
    let _ = ServerFirst::parse(&input.server_first);

    let client = ScramClient::new(input.username, input.password);
    assert!(client.client_first().starts_with("n,,n="));

    if let Ok((_, state)) = client.client_final(&input.server_first) {
        let _ = client.verify_server_final(&input.server_final, &state);
    }
});
