//! A bank transfer workflow used by the `runtime` binary and its tests.
//!
//! Two aggregates take part: `Account` holds a balance and `Transfer`
//! records a request to move money between accounts. The transfer saga
//! debits the source, credits the target and completes the transfer,
//! failing it when the debit is refused. [`BalanceView`] keeps a read
//! model of every account balance.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{AggregateId, HandlerError};
use domain::{Aggregate, AggregateState, CommandPayload, DomainEvent, EventSourcingHandlers};
use event_dispatch::Projection;
use event_store::EventRecord;
use saga::SagaContext;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::app::Runtime;
use crate::builder::RuntimeBuilder;
use crate::error::Result;
use crate::gateway::CommandGateway;

/// Saga association property shared by every transfer event.
pub const TRANSFER_ASSOCIATION: &str = "transferId";

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub owner: String,
    pub balance: i64,
}

impl AggregateState for Account {
    fn aggregate_type() -> &'static str {
        "Account"
    }

    fn snapshot_interval() -> Option<u64> {
        Some(50)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountOpened {
    pub owner: String,
    pub balance: i64,
}

impl DomainEvent for AccountOpened {
    fn event_type() -> &'static str {
        "AccountOpened"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deposited {
    pub amount: i64,
}

impl DomainEvent for Deposited {
    fn event_type() -> &'static str {
        "Deposited"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferDebited {
    pub transfer_id: AggregateId,
    pub amount: i64,
}

impl DomainEvent for TransferDebited {
    fn event_type() -> &'static str {
        "TransferDebited"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCredited {
    pub transfer_id: AggregateId,
    pub amount: i64,
}

impl DomainEvent for TransferCredited {
    fn event_type() -> &'static str {
        "TransferCredited"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenAccount {
    pub account_id: AggregateId,
    pub owner: String,
    pub initial_balance: i64,
}

impl CommandPayload for OpenAccount {
    fn command_type() -> &'static str {
        "OpenAccount"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }

    fn is_constructor() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposit {
    pub account_id: AggregateId,
    pub amount: i64,
}

impl CommandPayload for Deposit {
    fn command_type() -> &'static str {
        "Deposit"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebitForTransfer {
    pub account_id: AggregateId,
    pub transfer_id: AggregateId,
    pub amount: i64,
}

impl CommandPayload for DebitForTransfer {
    fn command_type() -> &'static str {
        "DebitForTransfer"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditForTransfer {
    pub account_id: AggregateId,
    pub transfer_id: AggregateId,
    pub amount: i64,
}

impl CommandPayload for CreditForTransfer {
    fn command_type() -> &'static str {
        "CreditForTransfer"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.account_id
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferStatus {
    #[default]
    Requested,
    Completed,
    Failed,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub source: AggregateId,
    pub target: AggregateId,
    pub amount: i64,
    pub status: TransferStatus,
}

impl AggregateState for Transfer {
    fn aggregate_type() -> &'static str {
        "Transfer"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequested {
    pub transfer_id: AggregateId,
    pub source: AggregateId,
    pub target: AggregateId,
    pub amount: i64,
}

impl DomainEvent for TransferRequested {
    fn event_type() -> &'static str {
        "TransferRequested"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferCompleted {
    pub transfer_id: AggregateId,
}

impl DomainEvent for TransferCompleted {
    fn event_type() -> &'static str {
        "TransferCompleted"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailed {
    pub transfer_id: AggregateId,
    pub reason: String,
}

impl DomainEvent for TransferFailed {
    fn event_type() -> &'static str {
        "TransferFailed"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestTransfer {
    pub transfer_id: AggregateId,
    pub source: AggregateId,
    pub target: AggregateId,
    pub amount: i64,
}

impl CommandPayload for RequestTransfer {
    fn command_type() -> &'static str {
        "RequestTransfer"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }

    fn is_constructor() -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTransfer {
    pub transfer_id: AggregateId,
}

impl CommandPayload for CompleteTransfer {
    fn command_type() -> &'static str {
        "CompleteTransfer"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailTransfer {
    pub transfer_id: AggregateId,
    pub reason: String,
}

impl CommandPayload for FailTransfer {
    fn command_type() -> &'static str {
        "FailTransfer"
    }

    fn aggregate_id(&self) -> AggregateId {
        self.transfer_id
    }
}

fn account_handlers() -> EventSourcingHandlers<Account> {
    let mut handlers = EventSourcingHandlers::new();
    handlers
        .on(|state: &mut Account, event: AccountOpened| {
            state.owner = event.owner;
            state.balance = event.balance;
        })
        .on(|state: &mut Account, event: Deposited| state.balance += event.amount)
        .on(|state: &mut Account, event: TransferDebited| state.balance -= event.amount)
        .on(|state: &mut Account, event: TransferCredited| state.balance += event.amount);
    handlers
}

fn transfer_handlers() -> EventSourcingHandlers<Transfer> {
    let mut handlers = EventSourcingHandlers::new();
    handlers
        .on(|state: &mut Transfer, event: TransferRequested| {
            state.source = event.source;
            state.target = event.target;
            state.amount = event.amount;
            state.status = TransferStatus::Requested;
        })
        .on(|state: &mut Transfer, _: TransferCompleted| state.status = TransferStatus::Completed)
        .on(|state: &mut Transfer, _: TransferFailed| state.status = TransferStatus::Failed);
    handlers
}

fn require_positive(amount: i64) -> std::result::Result<(), HandlerError> {
    if amount <= 0 {
        return Err(HandlerError::rejected(format!("amount must be positive, got {amount}")));
    }
    Ok(())
}

fn open_account(
    account: &mut Aggregate<Account>,
    command: OpenAccount,
) -> std::result::Result<(), HandlerError> {
    if command.initial_balance < 0 {
        return Err(HandlerError::rejected("initial balance cannot be negative"));
    }
    account.apply_new(AccountOpened {
        owner: command.owner,
        balance: command.initial_balance,
    })?;
    Ok(())
}

fn deposit(
    account: &mut Aggregate<Account>,
    command: Deposit,
) -> std::result::Result<(), HandlerError> {
    require_positive(command.amount)?;
    account.apply_new(Deposited {
        amount: command.amount,
    })?;
    Ok(())
}

fn debit_for_transfer(
    account: &mut Aggregate<Account>,
    command: DebitForTransfer,
) -> std::result::Result<(), HandlerError> {
    require_positive(command.amount)?;
    if account.state().balance < command.amount {
        return Err(HandlerError::rejected(format!(
            "insufficient funds: balance {}, requested {}",
            account.state().balance,
            command.amount
        )));
    }
    account.apply_new(TransferDebited {
        transfer_id: command.transfer_id,
        amount: command.amount,
    })?;
    Ok(())
}

fn credit_for_transfer(
    account: &mut Aggregate<Account>,
    command: CreditForTransfer,
) -> std::result::Result<(), HandlerError> {
    require_positive(command.amount)?;
    account.apply_new(TransferCredited {
        transfer_id: command.transfer_id,
        amount: command.amount,
    })?;
    Ok(())
}

fn request_transfer(
    transfer: &mut Aggregate<Transfer>,
    command: RequestTransfer,
) -> std::result::Result<(), HandlerError> {
    require_positive(command.amount)?;
    if command.source == command.target {
        return Err(HandlerError::rejected("source and target must differ"));
    }
    transfer.apply_new(TransferRequested {
        transfer_id: command.transfer_id,
        source: command.source,
        target: command.target,
        amount: command.amount,
    })?;
    Ok(())
}

fn complete_transfer(
    transfer: &mut Aggregate<Transfer>,
    command: CompleteTransfer,
) -> std::result::Result<(), HandlerError> {
    if transfer.state().status != TransferStatus::Requested {
        return Err(HandlerError::rejected("transfer is already settled"));
    }
    transfer.apply_new(TransferCompleted {
        transfer_id: command.transfer_id,
    })?;
    Ok(())
}

fn fail_transfer(
    transfer: &mut Aggregate<Transfer>,
    command: FailTransfer,
) -> std::result::Result<(), HandlerError> {
    if transfer.state().status != TransferStatus::Requested {
        return Err(HandlerError::rejected("transfer is already settled"));
    }
    transfer.apply_new(TransferFailed {
        transfer_id: command.transfer_id,
        reason: command.reason,
    })?;
    Ok(())
}

/// Debits the source. A refused debit fails the transfer, which ends the
/// saga through its `TransferFailed` handler.
async fn on_transfer_requested(
    gateway: CommandGateway,
    record: EventRecord,
) -> std::result::Result<(), HandlerError> {
    let requested: TransferRequested = record.payload_as()?;
    let debit = DebitForTransfer {
        account_id: requested.source,
        transfer_id: requested.transfer_id,
        amount: requested.amount,
    };

    if let Err(error) = gateway.send_payload(&debit).await {
        tracing::info!(transfer_id = %requested.transfer_id, %error, "transfer debit refused");
        gateway
            .send_payload(&FailTransfer {
                transfer_id: requested.transfer_id,
                reason: error.to_string(),
            })
            .await?;
    }
    Ok(())
}

async fn on_transfer_debited(
    gateway: CommandGateway,
    mut context: SagaContext,
    record: EventRecord,
) -> std::result::Result<(), HandlerError> {
    let requested: TransferRequested = context
        .state()
        .ok_or_else(|| HandlerError::rejected("transfer saga has no state"))?
        .payload_as()?;

    gateway
        .send_payload(&CreditForTransfer {
            account_id: requested.target,
            transfer_id: requested.transfer_id,
            amount: requested.amount,
        })
        .await?;

    context
        .record_step(&record.event_type, serde_json::to_value(&requested)?)
        .await
        .map_err(HandlerError::other)
}

async fn on_transfer_credited(
    gateway: CommandGateway,
    record: EventRecord,
) -> std::result::Result<(), HandlerError> {
    let credited: TransferCredited = record.payload_as()?;
    gateway
        .send_payload(&CompleteTransfer {
            transfer_id: credited.transfer_id,
        })
        .await?;
    Ok(())
}

/// Account balances built from account events.
#[derive(Debug, Default, Clone)]
pub struct BalanceView {
    balances: Arc<RwLock<HashMap<AggregateId, i64>>>,
}

impl BalanceView {
    pub const EVENT_TYPES: [&'static str; 4] =
        ["AccountOpened", "Deposited", "TransferDebited", "TransferCredited"];

    pub async fn balance(&self, account_id: AggregateId) -> Option<i64> {
        self.balances.read().await.get(&account_id).copied()
    }
}

#[async_trait]
impl Projection for BalanceView {
    fn name(&self) -> &str {
        "balance view"
    }

    async fn handle(&self, record: &EventRecord) -> std::result::Result<(), HandlerError> {
        let delta = match record.event_type.as_str() {
            "AccountOpened" => record.payload_as::<AccountOpened>()?.balance,
            "Deposited" => record.payload_as::<Deposited>()?.amount,
            "TransferDebited" => -record.payload_as::<TransferDebited>()?.amount,
            "TransferCredited" => record.payload_as::<TransferCredited>()?.amount,
            _ => return Ok(()),
        };
        *self
            .balances
            .write()
            .await
            .entry(record.aggregate_id)
            .or_insert(0) += delta;
        Ok(())
    }
}

/// Handles to the demo's read side.
#[derive(Debug, Clone)]
pub struct BankDemo {
    pub balances: BalanceView,
}

/// Registers both aggregates, the transfer saga and the balance view.
pub fn register(builder: &mut RuntimeBuilder) -> BankDemo {
    let accounts = builder.register_aggregate(account_handlers());
    builder
        .register_command_handler(&accounts, open_account)
        .register_command_handler(&accounts, deposit)
        .register_command_handler(&accounts, debit_for_transfer)
        .register_command_handler(&accounts, credit_for_transfer);

    let transfers = builder.register_aggregate(transfer_handlers());
    builder
        .register_command_handler(&transfers, request_transfer)
        .register_command_handler(&transfers, complete_transfer)
        .register_command_handler(&transfers, fail_transfer);

    let gateway = builder.command_gateway();
    let start = gateway.clone();
    let step = gateway.clone();
    let end = gateway;
    builder
        .register_saga_start("TransferRequested", TRANSFER_ASSOCIATION, move |_, record| {
            on_transfer_requested(start.clone(), record)
        })
        .register_saga_step("TransferDebited", TRANSFER_ASSOCIATION, move |context, record| {
            on_transfer_debited(step.clone(), context, record)
        })
        .register_saga_end("TransferCredited", TRANSFER_ASSOCIATION, move |_, record| {
            on_transfer_credited(end.clone(), record)
        })
        .register_saga_end("TransferFailed", TRANSFER_ASSOCIATION, |_, _| async { Ok(()) });

    let balances = BalanceView::default();
    for event_type in BalanceView::EVENT_TYPES {
        builder.register_projection(event_type, Arc::new(balances.clone()));
    }

    BankDemo { balances }
}

/// Opens two accounts and moves money between them twice, the second time
/// beyond the available balance so the saga takes its failure path.
pub async fn run(runtime: &Runtime, demo: &BankDemo) -> Result<()> {
    let alice = AggregateId::new();
    let bob = AggregateId::new();

    for (account_id, owner, initial_balance) in [(alice, "alice", 100), (bob, "bob", 20)] {
        runtime
            .send_payload(&OpenAccount {
                account_id,
                owner: owner.to_string(),
                initial_balance,
            })
            .await?;
    }

    let mut transfers = Vec::new();
    for amount in [30, 500] {
        let transfer_id = AggregateId::new();
        runtime
            .send_payload(&RequestTransfer {
                transfer_id,
                source: alice,
                target: bob,
                amount,
            })
            .await?;
        tracing::info!(%transfer_id, amount, "transfer requested");
        transfers.push(transfer_id);
    }

    if !wait_for_settlement(runtime, &transfers, Duration::from_secs(5)).await? {
        tracing::warn!("transfers still pending after demo timeout");
    }

    tracing::info!(
        alice = ?demo.balances.balance(alice).await,
        bob = ?demo.balances.balance(bob).await,
        "demo finished"
    );
    Ok(())
}

/// Polls until every transfer is completed or failed and no transfer saga
/// is left running. Returns `false` on timeout.
pub async fn wait_for_settlement(
    runtime: &Runtime,
    transfers: &[AggregateId],
    timeout: Duration,
) -> Result<bool> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let mut settled = runtime.saga_repository().count().await? == 0;
        for transfer_id in transfers {
            let status = transfer_status(runtime, *transfer_id).await?;
            settled &= matches!(status, TransferStatus::Completed | TransferStatus::Failed);
        }
        if settled {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Current status of a transfer, read from its last stored event.
pub async fn transfer_status(
    runtime: &Runtime,
    transfer_id: AggregateId,
) -> Result<TransferStatus> {
    let records = runtime.store().read_all(transfer_id).await?;
    let status = match records.last().map(|record| record.event_type.as_str()) {
        Some("TransferCompleted") => TransferStatus::Completed,
        Some("TransferFailed") => TransferStatus::Failed,
        _ => TransferStatus::Requested,
    };
    Ok(status)
}
