use mini_perplexity;

#[derive(Debug, serde::Deserialize)]
struct Verdict {
    relevant: bool,
    confidence: f64,
    reasoning: String,
}

#[tokio::main]
async fn main() -> Result<(), mini_perplexity::Error> {
    let client = mini_perplexity::Client::new(None, None)?;

    // Create a new chat completion request
    let mut request = mini_perplexity::ChatCompletions::default();

    // Add a message to the chat history
    request.messages.push(mini_perplexity::Message {
        content: "Is the sky blue on Mars? Judge the claim.".to_string(),
        role: mini_perplexity::ROLE_USER.to_string(),
    });

    // Constrain the answer to a JSON schema
    request.response_format = Some(mini_perplexity::ResponseFormat::JsonSchema(
        serde_json::json!({
            "type": "object",
            "properties": {
                "relevant": {"type": "boolean"},
                "confidence": {"type": "number"},
                "reasoning": {"type": "string"}
            },
            "required": ["relevant", "confidence", "reasoning"]
        }),
    ));

    // Send the request to the Perplexity API
    let response = client.chat_completions(&request).await?;

    // Parse the structured answer
    let verdict: Verdict = serde_json::from_str(&response.choices[0].message.content)
        .map_err(mini_perplexity::Error::DeserializationError)?;

    println!("{:?}", verdict);

    Ok(())
}
