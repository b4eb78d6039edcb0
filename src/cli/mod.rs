use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::time::Duration;
use uuid::Uuid;

use crate::application::BankService;
use crate::domain::{HolderRole, format_cents, format_rate, parse_cents};
use crate::io::{
    export_payments_csv, export_payments_json, export_transactions_csv, export_transactions_json,
};
use crate::storage::StoreOptions;

/// Bankbook - banking records with a consistent ledger
#[derive(Parser)]
#[command(name = "bankbook")]
#[command(about = "Banks, customers, savings accounts and loans over an atomic ledger")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "bankbook.db")]
    pub database: String,

    /// How long to wait for a locked record before giving up, in milliseconds
    #[arg(long, default_value_t = 5000)]
    pub lock_timeout_ms: u64,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Bank management commands
    #[command(subcommand)]
    Bank(BankCommands),

    /// Branch management commands
    #[command(subcommand)]
    Branch(BranchCommands),

    /// Customer management commands
    #[command(subcommand)]
    Customer(CustomerCommands),

    /// Savings account commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Loan commands
    #[command(subcommand)]
    Loan(LoanCommands),
}

#[derive(Subcommand)]
pub enum BankCommands {
    /// Create a new bank
    Create {
        /// Bank name
        name: String,
    },

    /// List all banks
    List,

    /// Show a bank and its branches
    Show {
        /// Bank ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum BranchCommands {
    /// Create a branch of an existing bank
    Create {
        /// Branch name
        name: String,

        /// Bank ID
        #[arg(long)]
        bank: String,

        /// Street address
        #[arg(short, long)]
        address: Option<String>,
    },

    /// Show a branch, its bank and its customers
    Show {
        /// Branch ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum CustomerCommands {
    /// Register a customer at a branch
    Register {
        /// Full name
        name: String,

        /// Email address (must be unique)
        #[arg(short, long)]
        email: String,

        /// Branch ID
        #[arg(long)]
        branch: String,

        /// Phone number
        #[arg(short, long)]
        phone: Option<String>,
    },

    /// Show a customer
    Show {
        /// Customer ID
        id: String,
    },

    /// List the customers of a branch
    List {
        /// Branch ID
        #[arg(long)]
        branch: String,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a savings account for a customer
    Open {
        /// Customer ID
        #[arg(long)]
        customer: String,

        /// Holder role: primary or joint
        #[arg(short, long, default_value = "primary")]
        role: String,
    },

    /// Link another customer to an account
    AddHolder {
        /// Account ID
        account: String,

        /// Customer ID
        #[arg(long)]
        customer: String,

        /// Holder role: primary or joint
        #[arg(short, long, default_value = "joint")]
        role: String,
    },

    /// Show an account with its balance and holders
    Show {
        /// Account ID
        id: String,
    },

    /// Deposit money into an account
    Deposit {
        /// Account ID
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account ID
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,
    },

    /// List the transactions of an account, newest first
    History {
        /// Account ID
        account: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Recompute the balance from the transaction log
    Verify {
        /// Account ID
        id: String,
    },
}

#[derive(Subcommand)]
pub enum LoanCommands {
    /// Take a new loan at the standard rate
    Take {
        /// Principal (e.g., "1000.00")
        principal: String,

        /// Customer ID
        #[arg(long)]
        customer: String,

        /// Loan type (e.g., "home", "car")
        #[arg(short = 't', long = "type", default_value = "personal")]
        loan_type: String,
    },

    /// Show a loan and its payments
    Show {
        /// Loan ID
        id: String,
    },

    /// List the loans of a customer, newest first
    List {
        /// Customer ID
        #[arg(long)]
        customer: String,
    },

    /// Repay part or all of a loan from a savings account
    Repay {
        /// Loan ID
        loan: String,

        /// Amount (e.g., "500.00")
        amount: String,

        /// Account to pay from; must be held by the borrower
        #[arg(long)]
        account: String,
    },

    /// List the payments made on a loan, newest first
    Payments {
        /// Loan ID
        loan: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },

    /// Yearly interest due on what is still pending
    Interest {
        /// Loan ID
        loan: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Csv,
    Json,
}

impl Cli {
    fn store_options(&self) -> StoreOptions {
        StoreOptions::default().with_lock_timeout(Duration::from_millis(self.lock_timeout_ms))
    }

    pub async fn run(self) -> Result<()> {
        let options = self.store_options();

        if let Commands::Init = self.command {
            BankService::init(&self.database, options).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = BankService::connect(&self.database, options)
            .await
            .with_context(|| format!("Failed to open database {}", self.database))?;

        match self.command {
            Commands::Init => {}
            Commands::Bank(cmd) => run_bank_command(&service, cmd).await?,
            Commands::Branch(cmd) => run_branch_command(&service, cmd).await?,
            Commands::Customer(cmd) => run_customer_command(&service, cmd).await?,
            Commands::Account(cmd) => run_account_command(&service, cmd).await?,
            Commands::Loan(cmd) => run_loan_command(&service, cmd).await?,
        }

        Ok(())
    }
}

async fn run_bank_command(service: &BankService, cmd: BankCommands) -> Result<()> {
    match cmd {
        BankCommands::Create { name } => {
            let bank = service.create_bank(name).await?;
            println!("Created bank: {} ({})", bank.name, bank.id);
        }

        BankCommands::List => {
            let banks = service.list_banks().await?;
            if banks.is_empty() {
                println!("No banks found.");
            } else {
                println!("{:<36}  {:<30} CREATED", "ID", "NAME");
                println!("{}", "-".repeat(80));
                for bank in banks {
                    println!(
                        "{:<36}  {:<30} {}",
                        bank.id,
                        truncate(&bank.name, 30),
                        bank.created_at.format("%Y-%m-%d")
                    );
                }
            }
        }

        BankCommands::Show { id } => {
            let info = service.get_bank(parse_id(&id, "bank")?).await?;
            println!("Bank: {}", info.bank.name);
            println!("  ID:       {}", info.bank.id);
            println!(
                "  Created:  {}",
                info.bank.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            if info.branches.is_empty() {
                println!("  No branches.");
            } else {
                println!("  Branches:");
                for branch in &info.branches {
                    println!(
                        "    {}  {}  {}",
                        branch.id,
                        branch.name,
                        branch.address.as_deref().unwrap_or("")
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_branch_command(service: &BankService, cmd: BranchCommands) -> Result<()> {
    match cmd {
        BranchCommands::Create {
            name,
            bank,
            address,
        } => {
            let branch = service
                .create_branch(parse_id(&bank, "bank")?, name, address)
                .await?;
            println!("Created branch: {} ({})", branch.name, branch.id);
        }

        BranchCommands::Show { id } => {
            let info = service.get_branch(parse_id(&id, "branch")?).await?;
            println!("Branch: {}", info.branch.name);
            println!("  ID:       {}", info.branch.id);
            println!("  Bank:     {} ({})", info.bank.name, info.bank.id);
            if let Some(address) = &info.branch.address {
                println!("  Address:  {}", address);
            }
            println!();
            if info.customers.is_empty() {
                println!("  No customers.");
            } else {
                println!("  Customers:");
                for customer in &info.customers {
                    println!(
                        "    {}  {:<25} {}",
                        customer.id,
                        truncate(&customer.name, 25),
                        customer.email
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_customer_command(service: &BankService, cmd: CustomerCommands) -> Result<()> {
    match cmd {
        CustomerCommands::Register {
            name,
            email,
            branch,
            phone,
        } => {
            let customer = service
                .register_customer(parse_id(&branch, "branch")?, name, email, phone)
                .await?;
            println!("Registered customer: {} ({})", customer.name, customer.id);
        }

        CustomerCommands::Show { id } => {
            let info = service.get_customer_info(parse_id(&id, "customer")?).await?;
            let customer = &info.customer;

            println!("Customer: {}", customer.name);
            println!("  ID:       {}", customer.id);
            println!("  Branch:   {}", customer.branch_id);
            println!("  Email:    {}", customer.email);
            if let Some(phone) = &customer.phone {
                println!("  Phone:    {}", phone);
            }
            println!(
                "  Joined:   {}",
                customer.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!();
            if info.accounts.is_empty() {
                println!("  No accounts.");
            } else {
                println!("  Accounts:");
                for (account, role) in &info.accounts {
                    println!(
                        "    {}  {:<14} {:>12}",
                        account.id,
                        role.as_str(),
                        format_cents(account.balance)
                    );
                }
            }
            if info.loans.is_empty() {
                println!("  No loans.");
            } else {
                println!("  Loans:");
                for loan in &info.loans {
                    println!(
                        "    {}  {:<10} {:<7} {:>12}",
                        loan.id,
                        truncate(&loan.loan_type, 10),
                        loan.status,
                        format_cents(loan.pending_amount)
                    );
                }
            }
        }

        CustomerCommands::List { branch } => {
            let customers = service.list_customers(parse_id(&branch, "branch")?).await?;
            if customers.is_empty() {
                println!("No customers found.");
            } else {
                println!("{:<36}  {:<25} EMAIL", "ID", "NAME");
                println!("{}", "-".repeat(90));
                for customer in customers {
                    println!(
                        "{:<36}  {:<25} {}",
                        customer.id,
                        truncate(&customer.name, 25),
                        customer.email
                    );
                }
            }
        }
    }
    Ok(())
}

async fn run_account_command(service: &BankService, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open { customer, role } => {
            let opened = service
                .open_account(parse_id(&customer, "customer")?, parse_role(&role)?)
                .await?;
            println!(
                "Opened account {} for customer {} ({})",
                opened.account.id, opened.holder.customer_id, opened.holder.role
            );
        }

        AccountCommands::AddHolder {
            account,
            customer,
            role,
        } => {
            let holder = service
                .add_account_holder(
                    parse_id(&account, "account")?,
                    parse_id(&customer, "customer")?,
                    parse_role(&role)?,
                )
                .await?;
            println!(
                "Customer {} now holds account {} ({})",
                holder.customer_id, holder.account_id, holder.role
            );
        }

        AccountCommands::Show { id } => {
            let info = service.get_account_info(parse_id(&id, "account")?).await?;
            println!("Account: {}", info.account.id);
            println!("  Balance:  {}", format_cents(info.account.balance));
            println!(
                "  Opened:   {}",
                info.account.created_at.format("%Y-%m-%d %H:%M:%S")
            );
            println!("  Holders:");
            for holder in &info.holders {
                println!("    {}  {}", holder.customer_id, holder.role);
            }
        }

        AccountCommands::Deposit { account, amount } => {
            let amount_cents = parse_amount(&amount)?;
            let movement = service
                .deposit(parse_id(&account, "account")?, amount_cents)
                .await?;
            println!(
                "Deposited {} into {} (balance {}, #{})",
                format_cents(movement.transaction.amount),
                movement.account.id,
                format_cents(movement.account.balance),
                movement.transaction.sequence
            );
        }

        AccountCommands::Withdraw { account, amount } => {
            let amount_cents = parse_amount(&amount)?;
            let movement = service
                .withdraw(parse_id(&account, "account")?, amount_cents)
                .await?;
            println!(
                "Withdrew {} from {} (balance {}, #{})",
                format_cents(movement.transaction.amount),
                movement.account.id,
                format_cents(movement.account.balance),
                movement.transaction.sequence
            );
        }

        AccountCommands::History {
            account,
            format,
            output,
        } => {
            let transactions = service
                .transaction_history(parse_id(&account, "account")?)
                .await?;
            run_history_output(&transactions, format, output.as_deref())?;
        }

        AccountCommands::Verify { id } => {
            let report = service.verify_account(parse_id(&id, "account")?).await?;
            println!("Account:      {}", report.account_id);
            println!("Transactions: {}", report.transaction_count);
            println!("Recorded:     {}", format_cents(report.recorded_balance));
            println!("Computed:     {}", format_cents(report.computed_balance));
            println!();

            if report.is_consistent() {
                println!("Account is consistent.");
            } else {
                for sequence in &report.inconsistent_snapshots {
                    println!("  - snapshot #{} disagrees with the running balance", sequence);
                }
                anyhow::bail!("Account {} does not reconcile", report.account_id);
            }
        }
    }
    Ok(())
}

fn run_history_output(
    transactions: &[crate::domain::Transaction],
    format: OutputFormat,
    output: Option<&str>,
) -> Result<()> {
    use std::fs::File;
    use std::io::{Write, stdout};

    if format == OutputFormat::Table {
        if transactions.is_empty() {
            println!("No transactions found.");
            return Ok(());
        }
        println!(
            "{:>6}  {:<20} {:<9} {:>12} {:>12}",
            "SEQ", "DATE", "KIND", "AMOUNT", "BALANCE"
        );
        println!("{}", "-".repeat(64));
        for tx in transactions {
            println!(
                "{:>6}  {:<20} {:<9} {:>12} {:>12}",
                tx.sequence,
                tx.created_at.format("%Y-%m-%d %H:%M:%S"),
                tx.kind,
                format_cents(tx.amount),
                format_cents(tx.balance)
            );
        }
        return Ok(());
    }

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    let count = match format {
        OutputFormat::Csv => export_transactions_csv(transactions, writer)?,
        _ => export_transactions_json(transactions, writer)?,
    };
    if output.is_some() {
        eprintln!("Exported {} transactions", count);
    }
    Ok(())
}

async fn run_loan_command(service: &BankService, cmd: LoanCommands) -> Result<()> {
    match cmd {
        LoanCommands::Take {
            principal,
            customer,
            loan_type,
        } => {
            let principal_cents = parse_amount(&principal)?;
            let loan = service
                .take_loan(parse_id(&customer, "customer")?, loan_type, principal_cents)
                .await?;
            println!(
                "Loan {} granted: principal {}, {} interest, {} payable",
                loan.id,
                format_cents(loan.principal),
                format_rate(loan.interest_rate),
                format_cents(loan.total_payable)
            );
        }

        LoanCommands::Show { id } => {
            let info = service.get_loan_info(parse_id(&id, "loan")?).await?;
            let loan = &info.loan;

            println!("Loan: {}", loan.id);
            println!("  Customer:  {}", loan.customer_id);
            println!("  Type:      {}", loan.loan_type);
            println!("  Status:    {}", loan.status);
            println!("  Principal: {}", format_cents(loan.principal));
            println!("  Rate:      {}", format_rate(loan.interest_rate));
            println!("  Payable:   {}", format_cents(loan.total_payable));
            println!("  Repaid:    {}", format_cents(loan.amount_repaid()));
            println!("  Pending:   {}", format_cents(loan.pending_amount));
            println!("  Started:   {}", loan.start_date.format("%Y-%m-%d"));
            if let Some(end) = loan.end_date {
                println!("  Closed:    {}", end.format("%Y-%m-%d"));
            }
            println!("  Payments:  {}", info.payments.len());
        }

        LoanCommands::List { customer } => {
            let loans = service
                .customer_loans(parse_id(&customer, "customer")?)
                .await?;
            if loans.is_empty() {
                println!("No loans found.");
            } else {
                println!(
                    "{:<36}  {:<10} {:<7} {:>12} {:>12}",
                    "ID", "TYPE", "STATUS", "PAYABLE", "PENDING"
                );
                println!("{}", "-".repeat(84));
                for loan in loans {
                    println!(
                        "{:<36}  {:<10} {:<7} {:>12} {:>12}",
                        loan.id,
                        truncate(&loan.loan_type, 10),
                        loan.status,
                        format_cents(loan.total_payable),
                        format_cents(loan.pending_amount)
                    );
                }
            }
        }

        LoanCommands::Repay {
            loan,
            amount,
            account,
        } => {
            let amount_cents = parse_amount(&amount)?;
            let repayment = service
                .repay_loan(
                    parse_id(&loan, "loan")?,
                    parse_id(&account, "account")?,
                    amount_cents,
                )
                .await?;
            println!(
                "Repaid {} on loan {}: pending {}, account balance {}",
                format_cents(repayment.payment.amount),
                repayment.loan.id,
                format_cents(repayment.loan.pending_amount),
                format_cents(repayment.account.balance)
            );
            if repayment.loan.is_closed() {
                println!("Loan is now closed.");
            }
        }

        LoanCommands::Payments { loan, format } => {
            let payments = service.loan_payments(parse_id(&loan, "loan")?).await?;
            match format {
                OutputFormat::Table => {
                    if payments.is_empty() {
                        println!("No payments found.");
                    } else {
                        println!("{:<20} {:>12}  ID", "DATE", "AMOUNT");
                        println!("{}", "-".repeat(72));
                        for payment in payments {
                            println!(
                                "{:<20} {:>12}  {}",
                                payment.payment_date.format("%Y-%m-%d %H:%M:%S"),
                                format_cents(payment.amount),
                                payment.id
                            );
                        }
                    }
                }
                OutputFormat::Csv => {
                    export_payments_csv(&payments, std::io::stdout())?;
                }
                OutputFormat::Json => {
                    export_payments_json(&payments, std::io::stdout())?;
                }
            }
        }

        LoanCommands::Interest { loan } => {
            let quote = service.yearly_interest(parse_id(&loan, "loan")?).await?;
            println!("Loan:     {}", quote.loan_id);
            println!("Pending:  {}", format_cents(quote.pending_amount));
            println!("Rate:     {}", format_rate(quote.interest_rate));
            println!("Interest: {} per year", format_cents(quote.yearly_interest));
        }
    }
    Ok(())
}

fn parse_id(input: &str, what: &str) -> Result<Uuid> {
    Uuid::parse_str(input.trim()).with_context(|| format!("Invalid {} ID: {}", what, input))
}

fn parse_amount(input: &str) -> Result<i64> {
    parse_cents(input).context("Invalid amount format. Use '50.00' or '50'")
}

fn parse_role(input: &str) -> Result<HolderRole> {
    HolderRole::parse(input).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid holder role '{}'. Valid roles: primary, joint",
            input
        )
    })
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
