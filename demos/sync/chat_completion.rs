use mini_perplexity;

fn main() -> Result<(), mini_perplexity::Error> {
    let client = mini_perplexity::Client::new(None, None)?;

    // Create a new chat completion request
    let mut request = mini_perplexity::ChatCompletions::default();

    // Add a message to the chat history
    request.messages.push(mini_perplexity::Message {
        content: "What did the James Webb Space Telescope find this year?".to_string(),
        role: mini_perplexity::ROLE_USER.to_string(),
    });

    // Restrict retrieval to a few trusted domains
    request.search_domain_filter = vec!["nasa.gov".to_string(), "wikipedia.org".to_string()];

    // Send the request to the Perplexity API
    let response = client.chat_completions(&request)?;

    // Print the generated completion
    println!("{}", response.choices[0].message.content);

    // Print the sources backing it
    for citation in response.citations.unwrap_or_default() {
        println!("  {}", citation);
    }

    Ok(())
}
