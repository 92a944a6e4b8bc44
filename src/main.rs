//! Ask Perplexity about the James Webb Space Telescope, restricted to a
//! fixed set of source domains, and print the answer.
//!
//! The API key comes from the `PERPLEXITY_API_KEY` environment variable;
//! `PERPLEXITY_API_BASE` overrides the endpoint. There are no flags. Any
//! transport, HTTP, or decode failure terminates the process with a
//! non-zero exit status.

use mini_perplexity::{ChatCompletions, Client, Error, Message, ROLE_SYSTEM, ROLE_USER};

fn payload() -> ChatCompletions {
    ChatCompletions {
        model: "sonar-reasoning-pro".into(),
        messages: vec![
            Message {
                role: ROLE_SYSTEM.into(),
                content: "You are a helpful assistant.".into(),
            },
            Message {
                role: ROLE_USER.into(),
                content: "Tell me about the James Webb Space Telescope discoveries.".into(),
            },
        ],
        search_domain_filter: vec![
            "nasa.gov".into(),
            "wikipedia.org".into(),
            "space.com".into(),
        ],
        ..Default::default()
    }
}

fn fetch_answer(client: &Client) -> Result<String, Error> {
    let mut response = client.chat_completions(&payload())?;

    // First choice only. An empty choices array is a shape failure and
    // panics, like any other malformed response.
    Ok(response.choices.remove(0).message.content)
}

fn main() -> Result<(), Error> {
    let client = Client::new(None, None)?;

    println!("{}", fetch_answer(&client)?);

    Ok(())
}
