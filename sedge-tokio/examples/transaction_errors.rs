use std::error::Error;
use std::fmt;

use rand::{rng, Rng};

use sedge_tokio::errors::{ErrorKind, UserError};
use sedge_tokio::{Builder, Client};

#[derive(Debug)]
struct CounterError;

impl fmt::Display for CounterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        "should not apply this counter update".fmt(f)
    }
}

impl Error for CounterError {}

fn check_val0(val: i64) -> Result<(), CounterError> {
    if val % 3 == 0 && rng().random_bool(0.9) {
        return Err(CounterError);
    }
    Ok(())
}

fn check_val1(val: i64) -> Result<(), CounterError> {
    if val % 3 == 1 && rng().random_bool(0.1) {
        return Err(CounterError);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let config = Builder::new()
        .host("localhost")
        .user("admin")
        .password("secret")
        .build()?;
    let client = Client::new(config);
    let res = client
        .transaction(|mut transaction| async move {
            let val = transaction
                .query_required_single::<i64, _>(
                    "
                WITH counter := (UPDATE Counter SET { value := .value + 1}),
                SELECT counter.value LIMIT 1
            ",
                    &(),
                )
                .await?;
            check_val0(val).map_err(UserError::with_source)?;
            check_val1(val).map_err(UserError::with_source)?;
            Ok(val)
        })
        .await;
    match res {
        Ok(val) => println!("New counter value: {val}"),
        Err(e) if e.source_error().is_some_and(|e| e.is::<CounterError>()) => {
            println!("Skipping: {e:#}");
        }
        Err(e) => return Err(e)?,
    }
    Ok(())
}
