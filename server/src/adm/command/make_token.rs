use anyhow::{anyhow, Result};
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use humantime::Duration;

use crate::Opts;
use depot::name::SpaceNamePattern;
use depot_server::config::Config;
use depot_token::Token;

/// Generate a new token.
///
/// For example, to generate a token for Alice with push access
/// to any space starting with `dev-` and pull access to `prod`,
/// expiring in 2 years:
///
/// $ depotadm make-token --sub "alice" --validity "2y" --pull "dev-*" --push "dev-*" --pull "prod"
#[derive(Debug, Parser)]
pub struct MakeToken {
    /// The subject of the JWT token.
    #[clap(long)]
    sub: String,

    /// The validity period of the JWT token.
    ///
    /// You can use expressions like "2 years", "3 months"
    /// and "1y".
    #[clap(long)]
    validity: Duration,

    /// Dump the claims without signing and encoding it.
    #[clap(long)]
    dump_claims: bool,

    /// A space that the token may pull artifacts from.
    ///
    /// The value may contain wildcards. Specify this flag multiple
    /// times to allow multiple patterns.
    #[clap(long = "pull", value_name = "PATTERN")]
    pull_patterns: Vec<SpaceNamePattern>,

    /// A space that the token may push artifacts to.
    ///
    /// The value may contain wildcards. Specify this flag multiple
    /// times to allow multiple patterns.
    #[clap(long = "push", value_name = "PATTERN")]
    push_patterns: Vec<SpaceNamePattern>,

    /// A space that the token may delete artifacts from.
    ///
    /// The value may contain wildcards. Specify this flag multiple
    /// times to allow multiple patterns.
    #[clap(long = "delete", value_name = "PATTERN")]
    delete_patterns: Vec<SpaceNamePattern>,
}

macro_rules! grant_permissions {
    ($token:ident, $list:expr, $perm:ident) => {
        for pattern in $list {
            let perm = $token.get_or_insert_permission_mut(pattern.to_owned());
            perm.$perm = true;
        }
    };
}

pub async fn run(config: Config, opts: Opts) -> Result<()> {
    let sub = opts.command.as_make_token().unwrap();
    let duration = ChronoDuration::from_std(sub.validity.into())?;
    let exp = Utc::now()
        .checked_add_signed(duration)
        .ok_or_else(|| anyhow!("Expiry timestamp overflowed"))?;

    let mut token = Token::new(sub.sub.to_owned(), &exp);

    grant_permissions!(token, &sub.pull_patterns, pull);
    grant_permissions!(token, &sub.push_patterns, push);
    grant_permissions!(token, &sub.delete_patterns, delete);

    if sub.dump_claims {
        println!("{}", serde_json::to_string(token.opaque_claims())?);
    } else {
        let encoded_token = token.encode(&config.token_hs256_secret.jwt)?;
        println!("{}", encoded_token);
    }

    Ok(())
}
