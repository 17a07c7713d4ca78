use anyhow::Context;
use clap::{Parser, Subcommand};
use convertkit_client::{Client, Credentials, EmailChange, Fields};
use futures_util::StreamExt;
use serde_json::Value;

#[derive(Debug, Parser, Clone)]
#[command(name = "convertkit")]
#[command(about = "A CLI tool to manage ConvertKit forms, sequences, tags and subscribers")]
struct Cli {
    #[arg(short = 'k', long, env = "CONVERT_KIT_API_KEY")]
    api_key: String,
    #[arg(short = 's', long, env = "CONVERT_KIT_API_SECRET")]
    api_secret: String,
    #[arg(
        short,
        long,
        env = "CONVERT_KIT_BASE_URL",
        default_value = convertkit_client::client::DEFAULT_BASE_URL
    )]
    base_url: String,
    #[arg(long, help = "Skip TLS verification when listing form subscriptions")]
    insecure_form_subscriptions: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand, Clone)]
enum Commands {
    #[command(about = "Lists all the forms")]
    Forms,
    #[command(about = "Shows the details of a form")]
    Form { form_id: String },
    #[command(about = "Lists the subscriptions of a form")]
    FormSubscriptions {
        form_id: String,
        #[arg(long, help = "Authenticate with the API secret instead of the key")]
        secret: bool,
    },
    #[command(about = "Subscribes an email to a form")]
    SubscribeForm {
        form_id: String,
        email: String,
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    #[command(about = "Subscribes an email to a sequence")]
    SubscribeSequence {
        sequence_id: String,
        email: String,
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    #[command(about = "Unsubscribes an email from a sequence")]
    UnsubscribeSequence { sequence_id: String, email: String },
    #[command(about = "Tags an email")]
    Tag {
        tag_id: String,
        email: String,
        #[arg(short, long = "field", value_parser = parse_field)]
        fields: Vec<(String, String)>,
    },
    #[command(about = "Removes a tag from an email")]
    Untag { email: String, tag_id: String },
    #[command(about = "Lists the tags of a subscriber")]
    Tags { subscriber_id: String },
    #[command(about = "Checks whether a subscriber has a tag")]
    IsTagged { subscriber_id: String, tag_id: String },
    #[command(about = "Lists subscribers, optionally filtered")]
    Subscribers {
        #[arg(short, long = "filter", value_parser = parse_field)]
        filters: Vec<(String, String)>,
    },
    #[command(about = "Shows the subscriber owning an email")]
    Subscriber { email: String },
    #[command(about = "Updates the subscriber owning an email")]
    Update {
        email: String,
        #[arg(short, long = "field", value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,
    },
    #[command(about = "Updates a subscriber by id")]
    UpdateById {
        subscriber_id: String,
        #[arg(short, long = "field", value_parser = parse_field, required = true)]
        fields: Vec<(String, String)>,
    },
    #[command(about = "Copies every tag of one email onto another")]
    CopyTags { from: String, to: String },
    #[command(about = "Moves a subscriber to a new email address")]
    ChangeEmail { old_email: String, new_email: String },
    #[command(about = "Unsubscribes an email from everything")]
    Unsubscribe { email: String },
}

fn parse_field(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got `{raw}`"))
}

fn to_fields(email: Option<&str>, pairs: Vec<(String, String)>) -> Fields {
    let mut fields: Fields = pairs.into_iter().collect();
    if let Some(email) = email {
        fields.insert("email", email);
    }
    fields
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn print_raw(resp: reqwest::Response) -> anyhow::Result<()> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        eprintln!("ConvertKit responded with status {status}");
    }
    match serde_json::from_str::<Value>(&body) {
        Ok(json) => print_json(&json),
        Err(_) => {
            println!("{body}");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Cli::parse();

    let client = Client::builder(Credentials::new(args.api_key, args.api_secret))
        .base_url(args.base_url)
        .insecure_form_subscriptions(args.insecure_form_subscriptions)
        .build()
        .context("cannot create the ConvertKit client")?;

    match args.command {
        Commands::Forms => print_raw(client.get_forms().await?).await?,
        Commands::Form { form_id } => print_raw(client.get_form_details(&form_id).await?).await?,
        Commands::FormSubscriptions { form_id, secret } => {
            let resp = if secret {
                client.list_subscribers_of_form(&form_id).await?
            } else {
                client.get_subscribers_by_form_id(&form_id).await?
            };
            print_raw(resp).await?
        }
        Commands::SubscribeForm {
            form_id,
            email,
            fields,
        } => {
            let fields = to_fields(Some(email.as_str()), fields);
            print_raw(client.subscribe_user_to_form(&form_id, fields).await?).await?
        }
        Commands::SubscribeSequence {
            sequence_id,
            email,
            fields,
        } => {
            let fields = to_fields(Some(email.as_str()), fields);
            print_raw(client.subscribe_user_to_sequence(&sequence_id, fields).await?).await?
        }
        Commands::UnsubscribeSequence { sequence_id, email } => {
            let fields = to_fields(Some(email.as_str()), vec![]);
            print_raw(
                client
                    .unsubscribe_user_from_sequence(&sequence_id, fields)
                    .await?,
            )
            .await?
        }
        Commands::Tag {
            tag_id,
            email,
            fields,
        } => {
            let fields = to_fields(Some(email.as_str()), fields);
            print_raw(client.subscribe_user_to_tag(&tag_id, fields).await?).await?
        }
        Commands::Untag { email, tag_id } => {
            client.unsubscribe_from_tag(&email, &tag_id).await?;
            println!("Removed tag {} from {}", tag_id, email);
        }
        Commands::Tags { subscriber_id } => {
            print_json(&client.list_tags_of_subscriber(&subscriber_id).await?)?
        }
        Commands::IsTagged {
            subscriber_id,
            tag_id,
        } => println!(
            "{}",
            client
                .check_subscriber_is_tagged(&subscriber_id, &tag_id)
                .await?
        ),
        Commands::Subscribers { filters } => {
            print_json(&client.list_subscribers(to_fields(None, filters)).await?)?
        }
        Commands::Subscriber { email } => print_json(&client.get_subscriber(&email).await?)?,
        Commands::Update { email, fields } => print_json(
            &client
                .update_subscriber_by_email(&email, to_fields(None, fields))
                .await?,
        )?,
        Commands::UpdateById {
            subscriber_id,
            fields,
        } => print_json(
            &client
                .update_subscriber_by_subscriber_id(&subscriber_id, to_fields(None, fields))
                .await?,
        )?,
        Commands::CopyTags { from, to } => {
            let subscriber = client.get_subscriber(&from).await?;
            let tags = client.list_tags_of_subscriber(&subscriber.id).await?;
            let gen = client.replay_tags(tags, to).await;

            gen.for_each(|res| async move {
                match res {
                    Ok(id) => println!("Copied tag {}", id),
                    Err(err) => eprintln!("{err}"),
                }
            })
            .await;
        }
        Commands::ChangeEmail {
            old_email,
            new_email,
        } => match client
            .change_email_of_subscriber(&old_email, &new_email)
            .await?
        {
            EmailChange::Renamed(res) => {
                println!("Renamed subscriber {}", res.subscriber.id);
                print_json(&res)?
            }
            EmailChange::Merged {
                replayed_tags,
                unsubscribed,
            } => {
                println!(
                    "{} already existed: copied {} tags and unsubscribed subscriber {}",
                    new_email,
                    replayed_tags.len(),
                    unsubscribed.id
                );
            }
            EmailChange::Unchanged(subscriber) => {
                println!("{} already belongs to subscriber {}", new_email, subscriber.id);
            }
        },
        Commands::Unsubscribe { email } => print_json(&client.unsubscribe_user(&email).await?)?,
    }

    Ok(())
}
